// SSH connection management

use super::auth::{authenticate_session, SshAuth};
use crate::errors::TransportError;
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Authenticated SSH session to one host
pub struct SshConnection {
    session: Session,
    host: String,
    _tcp: TcpStream,
}

impl SshConnection {
    /// Establish a compressed, authenticated SSH session
    ///
    /// A `timeout_seconds` of zero leaves every socket operation unbounded.
    #[instrument(skip(auth), fields(host = %host, port = %port, account = %account))]
    pub fn connect(
        host: &str,
        port: u16,
        account: &str,
        auth: &SshAuth,
        verify_host_key: bool,
        timeout_seconds: u64,
    ) -> Result<Self, TransportError> {
        info!("Establishing SSH connection");

        let tcp = TcpStream::connect((host, port)).map_err(|e| {
            error!(error = %e, "Failed to connect");
            TransportError::Connect {
                host: host.to_string(),
                reason: e.to_string(),
            }
        })?;

        let timeout = (timeout_seconds > 0).then(|| Duration::from_secs(timeout_seconds));
        tcp.set_read_timeout(timeout)
            .and_then(|_| tcp.set_write_timeout(timeout))
            .map_err(|e| TransportError::Connect {
                host: host.to_string(),
                reason: format!("Failed to set socket timeout: {}", e),
            })?;

        let mut sess = Session::new().map_err(|e| TransportError::Handshake {
            host: host.to_string(),
            reason: format!("Failed to create SSH session: {}", e),
        })?;

        let stream = tcp.try_clone().map_err(|e| TransportError::Connect {
            host: host.to_string(),
            reason: format!("Failed to clone TCP stream: {}", e),
        })?;
        sess.set_tcp_stream(stream);
        sess.set_compress(true);
        sess.set_timeout(u32::try_from(timeout_seconds.saturating_mul(1000)).unwrap_or(u32::MAX));

        sess.handshake().map_err(|e| {
            error!(error = %e, "SSH handshake failed");
            TransportError::Handshake {
                host: host.to_string(),
                reason: e.to_string(),
            }
        })?;

        if verify_host_key {
            verify_host_key_fn(&sess, host, port)?;
        }

        authenticate_session(&sess, host, account, auth).map_err(|e| {
            error!(error = %e, "Authentication failed");
            e
        })?;

        info!("SSH connection established");
        Ok(Self {
            session: sess,
            host: host.to_string(),
            _tcp: tcp,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "archive run complete", None) {
            debug!(host = %self.host, error = %e, "SSH disconnect failed");
        }
    }
}

/// Check the server key against `~/.ssh/known_hosts`
///
/// Unknown hosts are accepted with a warning; a changed key is rejected.
fn verify_host_key_fn(sess: &Session, host: &str, port: u16) -> Result<(), TransportError> {
    let Some((key, key_type)) = sess.host_key() else {
        return Err(TransportError::Handshake {
            host: host.to_string(),
            reason: "Server presented no host key".to_string(),
        });
    };

    let fingerprint = sess
        .host_key_hash(ssh2::HashType::Sha256)
        .map(|hash| {
            hash.iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(":")
        })
        .unwrap_or_default();

    let mut known_hosts = sess.known_hosts().map_err(|e| TransportError::Handshake {
        host: host.to_string(),
        reason: format!("Failed to initialise known hosts: {}", e),
    })?;

    if let Some(home) = std::env::var_os("HOME") {
        let file = Path::new(&home).join(".ssh").join("known_hosts");
        if file.exists() {
            if let Err(e) = known_hosts.read_file(&file, KnownHostFileKind::OpenSSH) {
                warn!(error = %e, path = %file.display(), "Failed to read known_hosts");
            }
        }
    }

    match known_hosts.check_port(host, port, key) {
        CheckResult::Match => {
            debug!(host_key_type = ?key_type, hash = %fingerprint, "Host key verified");
            Ok(())
        }
        CheckResult::NotFound => {
            warn!(
                host_key_type = ?key_type,
                hash = %fingerprint,
                "Host key not in known_hosts, accepting"
            );
            Ok(())
        }
        CheckResult::Mismatch => {
            error!(hash = %fingerprint, "Host key does not match known_hosts");
            Err(TransportError::Handshake {
                host: host.to_string(),
                reason: format!("Host key mismatch (SHA256 {})", fingerprint),
            })
        }
        CheckResult::Failure => Err(TransportError::Handshake {
            host: host.to_string(),
            reason: "Host key check failed".to_string(),
        }),
    }
}
