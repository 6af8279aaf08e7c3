// SSH-backed remote filesystem
// Listing runs `find` over an exec channel; reads and deletes go through SFTP.

use super::auth::SshAuth;
use super::connection::SshConnection;
use super::listing::{find_command, parse_listing};
use super::{RemoteConnector, RemoteFile, RemoteFs};
use crate::errors::TransportError;
use crate::models::Service;
use ssh2::{Channel, Sftp};
use std::io::{self, Read};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};

/// Remote filesystem over one SSH session
pub struct SshRemote {
    // Field order matters: the SFTP channel must close before the session
    sftp: Sftp,
    connection: SshConnection,
}

impl SshRemote {
    /// Open the SFTP subsystem on an established connection
    pub fn new(connection: SshConnection) -> Result<Self, TransportError> {
        let sftp = connection.session().sftp().map_err(|e| {
            error!(error = %e, host = %connection.host(), "Failed to open SFTP channel");
            TransportError::Sftp(format!("Failed to open SFTP channel: {}", e))
        })?;
        Ok(Self { sftp, connection })
    }

    fn exec(&self, command: &str) -> Result<(i32, String, String), TransportError> {
        let mut channel = self.connection.session().channel_session().map_err(|e| {
            TransportError::Sftp(format!("Failed to open exec channel: {}", e))
        })?;
        channel
            .exec(command)
            .map_err(|e| TransportError::Sftp(format!("Failed to run `{}`: {}", command, e)))?;

        let session = self.connection.session();
        let idle_timeout =
            (session.timeout() > 0).then(|| Duration::from_millis(u64::from(session.timeout())));
        session.set_blocking(false);
        let drained = drain_streams(&mut channel, idle_timeout);
        session.set_blocking(true);
        let (stdout, stderr) = drained?;
        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        channel
            .wait_close()
            .map_err(|e| TransportError::Sftp(format!("Failed to close exec channel: {}", e)))?;
        let status = channel
            .exit_status()
            .map_err(|e| TransportError::Sftp(format!("Failed to read exit status: {}", e)))?;

        Ok((status, stdout, stderr))
    }
}

/// Output streams of a running remote command
trait ExecStreams {
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn at_eof(&self) -> bool;
}

impl ExecStreams for Channel {
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stderr().read(buf)
    }

    fn at_eof(&self) -> bool {
        self.eof()
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

enum Chunk {
    Data(usize),
    Closed,
    Pending,
}

fn classify(result: io::Result<usize>) -> io::Result<Chunk> {
    match result {
        Ok(0) => Ok(Chunk::Closed),
        Ok(n) => Ok(Chunk::Data(n)),
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            Ok(Chunk::Pending)
        }
        Err(e) => Err(e),
    }
}

/// Read stdout and stderr in turn until both are closed
///
/// Both streams share one channel window, so neither may be read to the end
/// while the other is left full. Expects a non-blocking session. With an
/// `idle_timeout`, gives up once neither stream produced data for that long.
fn drain_streams(
    streams: &mut impl ExecStreams,
    idle_timeout: Option<Duration>,
) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut buf = [0u8; 8192];
    let mut last_data = Instant::now();

    while stdout_open || stderr_open {
        let mut progressed = false;

        if stdout_open {
            match classify(streams.read_stdout(&mut buf))? {
                Chunk::Data(n) => {
                    stdout.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Chunk::Closed => stdout_open = false,
                Chunk::Pending => {}
            }
        }
        if stderr_open {
            match classify(streams.read_stderr(&mut buf))? {
                Chunk::Data(n) => {
                    stderr.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Chunk::Closed => stderr_open = false,
                Chunk::Pending => {}
            }
        }

        if progressed {
            last_data = Instant::now();
            continue;
        }
        if streams.at_eof() {
            break;
        }
        if idle_timeout.is_some_and(|t| last_data.elapsed() >= t) {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "remote command produced no output before timeout",
            ));
        }
        thread::sleep(POLL_INTERVAL);
    }

    Ok((stdout, stderr))
}

impl RemoteFs for SshRemote {
    #[instrument(skip(self), fields(host = %self.connection.host()))]
    fn list_matching(&self, directory: &str, glob: &str) -> Result<Vec<String>, TransportError> {
        let command = find_command(directory, glob);
        let (status, stdout, stderr) = self.exec(&command)?;
        let files = parse_listing(&stdout);

        if status != 0 {
            // find exits non-zero when some subdirectory is unreadable but
            // still prints what it could reach
            if files.is_empty() {
                return Err(TransportError::Command {
                    command,
                    status,
                    stderr: stderr.trim().to_string(),
                });
            }
            warn!(
                status = status,
                stderr = %stderr.trim(),
                "Remote listing finished with errors, using partial result"
            );
        }

        debug!(count = files.len(), "Remote listing complete");
        Ok(files)
    }

    fn open(&self, path: &str) -> Result<RemoteFile, TransportError> {
        let stat = self
            .sftp
            .stat(Path::new(path))
            .map_err(|e| TransportError::NotFound(format!("{}: {}", path, e)))?;
        let file = self
            .sftp
            .open(Path::new(path))
            .map_err(|e| TransportError::Sftp(format!("Failed to open {}: {}", path, e)))?;

        Ok(RemoteFile {
            size: stat.size,
            reader: Box::new(file),
        })
    }

    fn remove(&self, path: &str) -> Result<(), TransportError> {
        self.sftp
            .unlink(Path::new(path))
            .map_err(|e| TransportError::Sftp(format!("Failed to remove {}: {}", path, e)))
    }
}

/// Connector opening SSH sessions with shared transport settings
#[derive(Debug, Clone)]
pub struct SshConnector {
    pub port: u16,
    pub auth: SshAuth,
    pub verify_host_key: bool,
    pub timeout_seconds: u64,
}

impl RemoteConnector for SshConnector {
    fn connect(&self, service: &Service) -> Result<Box<dyn RemoteFs>, TransportError> {
        let connection = SshConnection::connect(
            &service.host,
            self.port,
            &service.account,
            &self.auth,
            self.verify_host_key,
            self.timeout_seconds,
        )?;
        Ok(Box::new(SshRemote::new(connection)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    enum Step {
        Data(Vec<u8>),
        Block,
    }

    /// Scripted streams; an empty script reads as closed
    #[derive(Default)]
    struct ScriptedStreams {
        stdout: VecDeque<Step>,
        stderr: VecDeque<Step>,
        // stdout stays blocked until stderr has been read out
        stdout_waits_for_stderr: bool,
        stalled: bool,
    }

    fn next(script: &mut VecDeque<Step>, buf: &mut [u8]) -> io::Result<usize> {
        match script.pop_front() {
            None => Ok(0),
            Some(Step::Block) => Err(io::ErrorKind::WouldBlock.into()),
            Some(Step::Data(data)) => {
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
        }
    }

    impl ExecStreams for ScriptedStreams {
        fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.stalled || (self.stdout_waits_for_stderr && !self.stderr.is_empty()) {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            next(&mut self.stdout, buf)
        }

        fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.stalled {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            next(&mut self.stderr, buf)
        }

        fn at_eof(&self) -> bool {
            !self.stalled && self.stdout.is_empty() && self.stderr.is_empty()
        }
    }

    #[test]
    fn test_drain_reads_stderr_while_stdout_is_blocked() {
        let mut streams = ScriptedStreams {
            stdout: VecDeque::from([Step::Data(b"/var/log/a-2024-01-01.log\n".to_vec())]),
            stderr: (0..200)
                .map(|_| Step::Data(vec![b'x'; 4096]))
                .collect(),
            stdout_waits_for_stderr: true,
            ..Default::default()
        };

        let (stdout, stderr) = drain_streams(&mut streams, None).unwrap();
        assert_eq!(stdout, b"/var/log/a-2024-01-01.log\n");
        assert_eq!(stderr.len(), 200 * 4096);
    }

    #[test]
    fn test_drain_waits_through_pending_reads() {
        let mut streams = ScriptedStreams {
            stdout: VecDeque::from([
                Step::Block,
                Step::Data(b"one\n".to_vec()),
                Step::Block,
                Step::Data(b"two\n".to_vec()),
            ]),
            stderr: VecDeque::from([Step::Block, Step::Data(b"warning".to_vec())]),
            ..Default::default()
        };

        let (stdout, stderr) = drain_streams(&mut streams, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(stdout, b"one\ntwo\n");
        assert_eq!(stderr, b"warning");
    }

    #[test]
    fn test_drain_times_out_when_idle() {
        let mut streams = ScriptedStreams {
            stalled: true,
            ..Default::default()
        };

        let err = drain_streams(&mut streams, Some(Duration::from_millis(30))).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_drain_propagates_read_errors() {
        struct Broken;
        impl ExecStreams for Broken {
            fn read_stdout(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::ConnectionReset.into())
            }
            fn read_stderr(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn at_eof(&self) -> bool {
                false
            }
        }

        let err = drain_streams(&mut Broken, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
