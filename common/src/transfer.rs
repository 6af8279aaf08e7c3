// Transfer engine: remote file -> pending local file -> atomic rename -> optional remote delete
//
// A file only ever appears under its final name through a single rename of a
// fully written and synced pending file. Anything left under the pending
// name belongs to an interrupted run and is swept before the next attempt.

use crate::errors::{TransferError, TransportError};
use crate::models::FetchOutcome;
use crate::progress::ProgressObserver;
use crate::remote::RemoteFs;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Suffix of files still being written
pub const PENDING_SUFFIX: &str = ".download";

/// Suffix of gzip-compressed files
pub const GZIP_SUFFIX: &str = ".gz";

/// Final local path for a remote file: basename, always ending in `.gz`
pub fn local_name_for(remote_path: &str, local_dir: &Path) -> Result<PathBuf, TransferError> {
    let basename = Path::new(remote_path)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransferError::InvalidRemotePath(remote_path.to_string()))?;

    if basename.ends_with(GZIP_SUFFIX) {
        Ok(local_dir.join(basename))
    } else {
        Ok(local_dir.join(format!("{}{}", basename, GZIP_SUFFIX)))
    }
}

/// In-flight name for a final local path
pub fn pending_name_for(local_name: &Path) -> PathBuf {
    let mut name = local_name.as_os_str().to_os_string();
    name.push(PENDING_SUFFIX);
    PathBuf::from(name)
}

/// Downloads single files into the archive
#[derive(Debug, Clone, Copy)]
pub struct TransferEngine {
    remove_remote: bool,
    dry_run: bool,
    compression: Compression,
}

impl TransferEngine {
    pub fn new(remove_remote: bool, dry_run: bool) -> Self {
        Self {
            remove_remote,
            dry_run,
            compression: Compression::best(),
        }
    }

    /// Override the gzip level (0-9) used for uncompressed sources
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression = Compression::new(level.min(9));
        self
    }

    /// Fetch one remote file into `local_dir`
    ///
    /// Errors while streaming or renaming leave the pending file behind and
    /// never touch the final path or the remote source.
    #[instrument(skip(self, remote, observer), fields(remote_path = %remote_path))]
    pub fn fetch(
        &self,
        remote: &dyn RemoteFs,
        remote_path: &str,
        local_dir: &Path,
        observer: &mut dyn ProgressObserver,
    ) -> Result<FetchOutcome, TransferError> {
        let local_name = local_name_for(remote_path, local_dir)?;
        let pending_name = pending_name_for(&local_name);

        if pending_name.exists() {
            if self.dry_run {
                info!(path = %pending_name.display(), "Would remove stale pending file");
            } else {
                debug!(path = %pending_name.display(), "Removing stale pending file");
                fs::remove_file(&pending_name)
                    .map_err(|e| TransferError::io(&pending_name, e))?;
            }
        }

        if local_name.exists() {
            warn!(local_path = %local_name.display(), "Already archived, skipping");
            return Ok(FetchOutcome::AlreadyArchived {
                local_path: local_name,
            });
        }

        if self.dry_run {
            info!(local_path = %local_name.display(), "Would archive");
            return Ok(FetchOutcome::Planned {
                local_path: local_name,
            });
        }

        info!(local_path = %local_name.display(), "Archiving");

        let bytes_written = self.stream_to_pending(remote, remote_path, &pending_name, observer)?;

        fs::rename(&pending_name, &local_name).map_err(|e| TransferError::io(&local_name, e))?;
        debug!(local_path = %local_name.display(), bytes = bytes_written, "Promoted pending file");

        let remote_removed = if self.remove_remote {
            info!("Removing remote file");
            remote
                .remove(remote_path)
                .map_err(|source| TransferError::RemoteRemove {
                    path: remote_path.to_string(),
                    source,
                })?;
            true
        } else {
            false
        };

        Ok(FetchOutcome::Archived {
            local_path: local_name,
            bytes_written,
            remote_removed,
        })
    }

    /// Stream the remote file into `pending_name`, compressing unless already gzip
    fn stream_to_pending(
        &self,
        remote: &dyn RemoteFs,
        remote_path: &str,
        pending_name: &Path,
        observer: &mut dyn ProgressObserver,
    ) -> Result<u64, TransferError> {
        let source = remote.open(remote_path)?;
        let total = source.size;

        let file = File::create(pending_name).map_err(|e| TransferError::io(pending_name, e))?;
        let display_name = Path::new(remote_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(remote_path);
        observer.on_start(display_name, total);

        let mut reader = ProgressReader {
            inner: source.reader,
            bytes: 0,
            total,
            read_failed: false,
            observer: &mut *observer,
        };

        let copied = if remote_path.ends_with(GZIP_SUFFIX) {
            let mut writer = BufWriter::new(file);
            io::copy(&mut reader, &mut writer)
                .and_then(|_| writer.into_inner().map_err(|e| e.into_error()))
                .and_then(|file| file.sync_all())
        } else {
            let mut encoder = GzEncoder::new(BufWriter::new(file), self.compression);
            io::copy(&mut reader, &mut encoder)
                .and_then(|_| encoder.finish())
                .and_then(|writer| writer.into_inner().map_err(|e| e.into_error()))
                .and_then(|file| file.sync_all())
        };

        let (bytes_read, read_failed) = (reader.bytes, reader.read_failed);
        drop(reader);
        if let Err(e) = copied {
            return Err(if read_failed {
                TransferError::Transport(TransportError::Io(e))
            } else {
                TransferError::io(pending_name, e)
            });
        }
        observer.on_finish(bytes_read);

        let written = fs::metadata(pending_name)
            .map_err(|e| TransferError::io(pending_name, e))?
            .len();
        Ok(written)
    }
}

/// Reader that reports byte counts and remembers whether the source failed
struct ProgressReader<'a> {
    inner: Box<dyn Read>,
    bytes: u64,
    total: Option<u64>,
    read_failed: bool,
    observer: &'a mut dyn ProgressObserver,
}

impl Read for ProgressReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => {
                if n > 0 {
                    self.bytes += n as u64;
                    self.observer.on_progress(self.bytes, self.total);
                }
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(e),
            Err(e) => {
                self.read_failed = true;
                Err(e)
            }
        }
    }
}
