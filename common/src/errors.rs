// Error handling framework
// One enum per failure scope: transport (unit), transfer (file), retention (item), config (fatal)

use std::path::PathBuf;
use thiserror::Error;

/// Remote session and command errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("SSH handshake with {host} failed: {reason}")]
    Handshake { host: String, reason: String },

    #[error("Authentication failed for {account}@{host}: {reason}")]
    Authentication {
        host: String,
        account: String,
        reason: String,
    },

    #[error("Remote command `{command}` failed with exit status {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("SFTP operation failed: {0}")]
    Sftp(String),

    #[error("Remote file not found: {0}")]
    NotFound(String),

    #[error("Remote I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors for a single file transfer
#[derive(Error, Debug)]
pub enum TransferError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Local I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archived locally but failed to remove remote file {path}: {source}")]
    RemoteRemove {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("Remote path has no file name: {0}")]
    InvalidRemotePath(String),
}

impl TransferError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TransferError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while pruning a local archive tree
#[derive(Error, Debug)]
pub enum RetentionError {
    #[error("Failed to delete {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk archive tree: {0}")]
    Walk(String),
}

/// Configuration errors, always fatal at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },
}

/// Failure of a whole (service, host) unit
#[derive(Error, Debug)]
pub enum UnitError {
    #[error("Failed to create local directory {path}: {source}")]
    LocalDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Run cancelled before unit started")]
    Cancelled,

    #[error("Unit task failed: {0}")]
    TaskFailed(String),
}
