// Transfer progress observers

use tracing::info;

/// Receives byte counts while a file streams into the archive
///
/// Every method has a no-op default, so implementors override only what
/// they care about.
pub trait ProgressObserver {
    /// Called once before the first byte, `total` is the remote size if known
    fn on_start(&mut self, _name: &str, _total: Option<u64>) {}

    /// Called after every chunk with the running byte count
    fn on_progress(&mut self, _bytes_transferred: u64, _total: Option<u64>) {}

    /// Called once after the last byte was read
    fn on_finish(&mut self, _bytes_transferred: u64) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {}

/// Observer that logs every tenth of the transfer
#[derive(Debug, Default)]
pub struct LogProgress {
    name: String,
    last_decile: u64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressObserver for LogProgress {
    fn on_start(&mut self, name: &str, total: Option<u64>) {
        self.name = name.to_string();
        self.last_decile = 0;
        info!(file = %self.name, total_bytes = ?total, "Transfer started");
    }

    fn on_progress(&mut self, bytes_transferred: u64, total: Option<u64>) {
        let Some(total) = total.filter(|t| *t > 0) else {
            return;
        };
        let decile = bytes_transferred.saturating_mul(10) / total;
        if decile > self.last_decile && decile < 10 {
            self.last_decile = decile;
            info!(
                file = %self.name,
                bytes = bytes_transferred,
                total_bytes = total,
                percent = decile * 10,
                "Transfer progress"
            );
        }
    }

    fn on_finish(&mut self, bytes_transferred: u64) {
        info!(file = %self.name, bytes = bytes_transferred, "Transfer finished");
    }
}
