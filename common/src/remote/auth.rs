// SSH authentication
// Tries the agent (when allowed), then the configured key, then the default identities.

use crate::errors::TransportError;
use ssh2::Session;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where credentials for a session may come from
#[derive(Debug, Clone, Default)]
pub struct SshAuth {
    /// Offer keys held by a running ssh-agent
    pub use_agent: bool,
    /// Explicit private key, tried before the default identities
    pub private_key_path: Option<PathBuf>,
}

/// Default identity files under `home`, in the order OpenSSH tries them
pub fn default_identity_files(home: &Path) -> Vec<PathBuf> {
    ["id_ed25519", "id_ecdsa", "id_rsa"]
        .iter()
        .map(|name| home.join(".ssh").join(name))
        .collect()
}

/// Authenticate `account` on an established session
pub fn authenticate_session(
    sess: &Session,
    host: &str,
    account: &str,
    auth: &SshAuth,
) -> Result<(), TransportError> {
    let mut attempts: Vec<String> = Vec::new();

    if auth.use_agent {
        debug!(account = %account, "Authenticating with ssh-agent");
        match sess.userauth_agent(account) {
            Ok(()) if sess.authenticated() => return Ok(()),
            Ok(()) => attempts.push("agent: no key accepted".to_string()),
            Err(e) => attempts.push(format!("agent: {}", e)),
        }
    }

    let mut candidates: Vec<PathBuf> = auth.private_key_path.iter().cloned().collect();
    if let Some(home) = std::env::var_os("HOME") {
        candidates.extend(default_identity_files(Path::new(&home)));
    }

    for key in candidates {
        if !key.exists() {
            continue;
        }
        debug!(account = %account, key_path = %key.display(), "Authenticating with SSH key");
        match sess.userauth_pubkey_file(account, None, &key, None) {
            Ok(()) if sess.authenticated() => return Ok(()),
            Ok(()) => attempts.push(format!("{}: not accepted", key.display())),
            Err(e) => attempts.push(format!("{}: {}", key.display(), e)),
        }
    }

    if attempts.is_empty() {
        attempts.push("no credentials available".to_string());
    }

    Err(TransportError::Authentication {
        host: host.to_string(),
        account: account.to_string(),
        reason: attempts.join("; "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_identity_files_order() {
        let files = default_identity_files(Path::new("/home/deploy"));
        assert_eq!(
            files,
            vec![
                PathBuf::from("/home/deploy/.ssh/id_ed25519"),
                PathBuf::from("/home/deploy/.ssh/id_ecdsa"),
                PathBuf::from("/home/deploy/.ssh/id_rsa"),
            ]
        );
    }
}
