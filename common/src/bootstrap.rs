// Bootstrap utilities for binary initialization

use crate::config::Settings;
use crate::remote::{RemoteConnector, SshAuth, SshConnector};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Load settings from a config file without validating them
///
/// Validation logs warnings, so callers install logging in between and then
/// call [`validate_settings`].
///
/// # Errors
/// Returns error if the file cannot be read or parsed
#[tracing::instrument]
pub fn load_settings(path: &Path) -> Result<Settings> {
    Settings::load_from_path(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Validate loaded settings and log what will be processed
///
/// # Errors
/// Returns error if a required field is missing or a value is out of range
pub fn validate_settings(settings: &Settings, path: &Path) -> Result<()> {
    settings
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    info!(
        archive_dir = %settings.archive_dir.display(),
        services = settings.services.len(),
        units = settings.services().len(),
        "Configuration loaded"
    );
    Ok(())
}

/// Build the SSH connector from settings and the agent flag
pub fn init_ssh_connector(settings: &Settings, use_ssh_agent: bool) -> Arc<dyn RemoteConnector> {
    let auth = SshAuth {
        use_agent: use_ssh_agent,
        private_key_path: settings.ssh.private_key_path.clone(),
    };

    info!(
        port = settings.ssh.port,
        use_agent = use_ssh_agent,
        verify_host_key = settings.ssh.verify_host_key,
        "SSH connector initialized"
    );

    Arc::new(SshConnector {
        port: settings.ssh.port,
        auth,
        verify_host_key: settings.ssh.verify_host_key,
        timeout_seconds: settings.ssh.timeout_seconds,
    })
}

/// Create the archive root if needed; a dry run only reports it
///
/// # Errors
/// Returns error if the directory cannot be created
pub fn init_archive_root(settings: &Settings, dry_run: bool) -> Result<()> {
    let root = &settings.archive_dir;
    if root.exists() {
        return Ok(());
    }
    if dry_run {
        info!(path = %root.display(), "Would create archive directory");
        return Ok(());
    }

    std::fs::create_dir_all(root)
        .with_context(|| format!("Failed to create archive directory {}", root.display()))?;
    info!(path = %root.display(), "Created archive directory");
    Ok(())
}
