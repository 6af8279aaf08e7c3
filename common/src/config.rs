// Configuration management with layered configuration (file, env)

use crate::dates::contains_placeholder;
use crate::errors::ConfigError;
use crate::models::Service;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Local archive root
    pub archive_dir: PathBuf,
    #[serde(default)]
    pub ssh: SshConfig,
    /// Number of units processed at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    pub services: BTreeMap<String, ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hosts: Vec<String>,
    pub account: String,
    pub directory: String,
    pub pattern: String,
    pub days_to_keep_on_remote: u32,
    #[serde(default)]
    pub retention_period_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Socket timeout, 0 disables it
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default = "default_verify_host_key")]
    pub verify_host_key: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_concurrency() -> usize {
    1
}

fn default_ssh_port() -> u16 {
    22
}

fn default_verify_host_key() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            port: default_ssh_port(),
            timeout_seconds: 0,
            private_key_path: None,
            verify_host_key: default_verify_host_key(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: file → env
    ///
    /// The file format follows its extension (yaml, toml, json). Environment
    /// variables use the `ARCHIVER` prefix and `__` as separator, e.g.
    /// `ARCHIVER__ARCHIVE_DIR`.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let builder = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix("ARCHIVER")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Validate configuration settings
    ///
    /// A pattern without date placeholder is only warned about.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.archive_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("archive_dir".to_string()));
        }
        if self.services.is_empty() {
            return Err(ConfigError::MissingField("services".to_string()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidFieldValue {
                field: "concurrency".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.ssh.port == 0 {
            return Err(ConfigError::InvalidFieldValue {
                field: "ssh.port".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        for (name, service) in &self.services {
            let field = |f: &str| format!("services.{}.{}", name, f);

            if name.trim().is_empty() {
                return Err(ConfigError::InvalidFieldValue {
                    field: "services".to_string(),
                    reason: "service name cannot be empty".to_string(),
                });
            }
            if service.hosts.is_empty() {
                return Err(ConfigError::MissingField(field("hosts")));
            }
            if service.hosts.iter().any(|h| h.trim().is_empty()) {
                return Err(ConfigError::InvalidFieldValue {
                    field: field("hosts"),
                    reason: "host cannot be empty".to_string(),
                });
            }
            if service.account.trim().is_empty() {
                return Err(ConfigError::MissingField(field("account")));
            }
            if service.directory.trim().is_empty() {
                return Err(ConfigError::MissingField(field("directory")));
            }
            if service.pattern.trim().is_empty() {
                return Err(ConfigError::MissingField(field("pattern")));
            }
            if !contains_placeholder(&service.pattern) {
                warn!(
                    service = %name,
                    pattern = %service.pattern,
                    "Pattern does not include a date placeholder"
                );
            }
        }

        Ok(())
    }

    /// One service descriptor per (service, host), ordered by name then host
    ///
    /// A retention period of zero days disables pruning.
    pub fn services(&self) -> Vec<Service> {
        self.services
            .iter()
            .flat_map(|(name, config)| {
                config.hosts.iter().map(move |host| Service {
                    name: name.clone(),
                    host: host.clone(),
                    account: config.account.clone(),
                    directory: config.directory.clone(),
                    pattern: config.pattern.clone(),
                    days_to_keep_on_remote: config.days_to_keep_on_remote,
                    retention_period_days: config.retention_period_days.filter(|d| *d > 0),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
archive_dir: /srv/archive
ssh:
  port: 2222
services:
  webapp:
    hosts: [h1, h2]
    account: deploy
    directory: /var/log/webapp
    pattern: access-<DATE>.log
    days_to_keep_on_remote: 7
    retention_period_days: 30
  billing:
    hosts: [b1]
    account: billing
    directory: /var/log/billing
    pattern: billing-<DATE->.log.gz
    days_to_keep_on_remote: 3
"#;

    fn load(content: &str) -> Result<Settings, ConfigError> {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("archiver.yaml");
        fs::write(&path, content).unwrap();
        Settings::load_from_path(&path)
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let settings = load(SAMPLE).unwrap();
        assert_eq!(settings.archive_dir, PathBuf::from("/srv/archive"));
        assert_eq!(settings.ssh.port, 2222);
        assert!(settings.ssh.verify_host_key);
        assert_eq!(settings.concurrency, 1);
        assert_eq!(settings.observability.log_level, "info");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_services_expand_per_host() {
        let settings = load(SAMPLE).unwrap();
        let services = settings.services();
        let units: Vec<(&str, &str)> = services
            .iter()
            .map(|s| (s.name.as_str(), s.host.as_str()))
            .collect();
        assert_eq!(units, vec![("billing", "b1"), ("webapp", "h1"), ("webapp", "h2")]);
        assert_eq!(services[0].retention_period_days, None);
        assert_eq!(services[1].retention_period_days, Some(30));
        assert_eq!(services[2].days_to_keep_on_remote, 7);
    }

    #[test]
    fn test_missing_required_field_fails_to_load() {
        let without_account = SAMPLE.replace("    account: deploy\n", "");
        assert!(load(&without_account).is_err());
    }

    #[test]
    fn test_validation_catches_empty_hosts() {
        let mut settings = load(SAMPLE).unwrap();
        if let Some(webapp) = settings.services.get_mut("webapp") {
            webapp.hosts.clear();
        }
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingField(f)) if f == "services.webapp.hosts"
        ));
    }

    #[test]
    fn test_validation_catches_zero_concurrency() {
        let mut settings = load(SAMPLE).unwrap();
        settings.concurrency = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_retention_disables_pruning() {
        let mut settings = load(SAMPLE).unwrap();
        if let Some(webapp) = settings.services.get_mut("webapp") {
            webapp.retention_period_days = Some(0);
        }
        assert!(settings
            .services()
            .iter()
            .all(|s| s.retention_period_days.is_none()));
    }
}
