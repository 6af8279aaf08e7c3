// In-memory remote filesystem
// Same capability set as the SSH remote, with fault injection for tests and rehearsals.

use super::listing::glob_matches;
use super::{RemoteConnector, RemoteFile, RemoteFs};
use crate::errors::TransportError;
use crate::models::Service;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    removed: Vec<String>,
    read_failures: HashMap<String, usize>,
    remove_failures: Vec<String>,
    listing_failure: Option<String>,
    opened: Vec<String>,
}

/// Shared handle to an in-memory remote host
///
/// Clones share state, so a test can keep one handle and hand another to
/// the code under test.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicked test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add or replace a file
    pub fn add_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        self.lock().files.insert(path.to_string(), data.into());
    }

    pub fn file_exists(&self, path: &str) -> bool {
        self.lock().files.contains_key(path)
    }

    /// Paths deleted through `remove`, in call order
    pub fn removed(&self) -> Vec<String> {
        self.lock().removed.clone()
    }

    /// Paths opened for reading, in call order
    pub fn opened(&self) -> Vec<String> {
        self.lock().opened.clone()
    }

    /// Make reads of `path` fail after `after_bytes` bytes
    pub fn fail_reads(&self, path: &str, after_bytes: usize) {
        self.lock().read_failures.insert(path.to_string(), after_bytes);
    }

    /// Make `remove` of `path` fail
    pub fn fail_remove(&self, path: &str) {
        self.lock().remove_failures.push(path.to_string());
    }

    /// Make every listing fail with a command error
    pub fn fail_listing(&self, stderr: &str) {
        self.lock().listing_failure = Some(stderr.to_string());
    }
}

impl RemoteFs for MemoryRemote {
    fn list_matching(&self, directory: &str, glob: &str) -> Result<Vec<String>, TransportError> {
        let state = self.lock();
        if let Some(stderr) = &state.listing_failure {
            return Err(TransportError::Command {
                command: super::listing::find_command(directory, glob),
                status: 1,
                stderr: stderr.clone(),
            });
        }

        let root = Path::new(directory);
        // BTreeMap keys are already sorted and unique
        Ok(state
            .files
            .keys()
            .filter(|p| {
                let path = Path::new(p.as_str());
                path.starts_with(root)
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| glob_matches(glob, n))
            })
            .cloned()
            .collect())
    }

    fn open(&self, path: &str) -> Result<RemoteFile, TransportError> {
        let mut state = self.lock();
        let data = state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(path.to_string()))?;
        state.opened.push(path.to_string());

        let size = Some(data.len() as u64);
        let reader: Box<dyn Read> = match state.read_failures.get(path) {
            Some(&after) => Box::new(FailingReader {
                inner: Cursor::new(data),
                remaining: after,
            }),
            None => Box::new(Cursor::new(data)),
        };
        Ok(RemoteFile { size, reader })
    }

    fn remove(&self, path: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.remove_failures.iter().any(|p| p == path) {
            return Err(TransportError::Sftp(format!(
                "Permission denied removing {}",
                path
            )));
        }
        state
            .files
            .remove(path)
            .ok_or_else(|| TransportError::NotFound(path.to_string()))?;
        state.removed.push(path.to_string());
        Ok(())
    }
}

/// Reader that yields `remaining` bytes and then an error
struct FailingReader {
    inner: Cursor<Vec<u8>>,
    remaining: usize,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ));
        }
        let max = buf.len().min(self.remaining);
        let n = self.inner.read(&mut buf[..max])?;
        self.remaining -= n;
        Ok(n)
    }
}

/// Connector handing out in-memory remotes by host name
///
/// Hosts that were never added are unreachable.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    hosts: HashMap<String, MemoryRemote>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, remote: MemoryRemote) -> Self {
        self.hosts.insert(host.to_string(), remote);
        self
    }
}

impl RemoteConnector for MemoryConnector {
    fn connect(&self, service: &Service) -> Result<Box<dyn RemoteFs>, TransportError> {
        self.hosts
            .get(&service.host)
            .cloned()
            .map(|r| Box::new(r) as Box<dyn RemoteFs>)
            .ok_or_else(|| TransportError::Connect {
                host: service.host.clone(),
                reason: "connection refused".to_string(),
            })
    }
}
