// Remote filesystem capability used by the transfer engine
// The SSH implementation lives in `sftp`, an in-memory one in `memory`.

mod auth;
mod connection;
pub mod listing;
pub mod memory;
mod sftp;

pub use auth::{authenticate_session, default_identity_files, SshAuth};
pub use connection::SshConnection;
pub use memory::{MemoryConnector, MemoryRemote};
pub use sftp::{SshConnector, SshRemote};

use crate::errors::TransportError;
use crate::models::Service;
use std::io::Read;

/// An open remote file ready to be streamed
pub struct RemoteFile {
    /// Size in bytes, when the remote reports it
    pub size: Option<u64>,
    pub reader: Box<dyn Read>,
}

impl std::fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// List, read and delete files on one remote host
#[cfg_attr(test, mockall::automock)]
pub trait RemoteFs {
    /// Paths under `directory` whose file name matches `glob`, trimmed and sorted
    fn list_matching(&self, directory: &str, glob: &str) -> Result<Vec<String>, TransportError>;

    /// Open a remote file for streaming
    fn open(&self, path: &str) -> Result<RemoteFile, TransportError>;

    /// Delete a remote file
    fn remove(&self, path: &str) -> Result<(), TransportError>;
}

/// Opens a remote session for a unit
///
/// The session is closed when the returned value is dropped.
#[cfg_attr(test, mockall::automock)]
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, service: &Service) -> Result<Box<dyn RemoteFs>, TransportError>;
}
