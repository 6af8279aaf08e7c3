// Service orchestrator: drives listing, selection, transfer and retention per (service, host) unit
//
// Every unit is isolated: a failure is captured in its `UnitResult` and the
// run moves on to the next unit.

use crate::dates::{contains_placeholder, glob_for_pattern, older_than, select_for_age};
use crate::errors::UnitError;
use crate::models::{FailedFile, RunSummary, Service, UnitReport, UnitResult};
use crate::progress::{LogProgress, NoopProgress, ProgressObserver};
use crate::remote::RemoteConnector;
use crate::retention;
use crate::transfer::TransferEngine;
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

/// Run-mode flags
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// List and select, log intended actions, change nothing
    pub dry_run: bool,
    /// Delete remote files after they are archived
    pub remove_remote: bool,
    /// Log transfer progress
    pub verbose: bool,
}

/// Archives remote log files for a set of services
pub struct Archiver {
    archive_dir: PathBuf,
    connector: Arc<dyn RemoteConnector>,
    options: RunOptions,
    today: NaiveDate,
    shutdown_flag: Arc<AtomicBool>,
}

impl Archiver {
    pub fn new(
        archive_dir: impl Into<PathBuf>,
        connector: Arc<dyn RemoteConnector>,
        options: RunOptions,
        today: NaiveDate,
    ) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            connector,
            options,
            today,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned shutdown flag
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = flag;
        self
    }

    /// Request a stop after the file currently being transferred
    pub fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::SeqCst)
    }

    /// Local directory owned by a unit: `<archive_dir>/<name>/<host>`
    pub fn service_dir(&self, service: &Service) -> PathBuf {
        self.archive_dir.join(&service.name).join(&service.host)
    }

    /// Process one unit: list, select, fetch oldest first, then prune
    #[instrument(skip(self, service), fields(service = %service.name, host = %service.host))]
    pub fn archive_service(&self, service: &Service) -> Result<UnitReport, UnitError> {
        let base_dir = self.service_dir(service);
        self.ensure_dir(&base_dir)?;

        if !contains_placeholder(&service.pattern) {
            warn!(pattern = %service.pattern, "Pattern does not include date placeholder");
        }

        let mut report = UnitReport::default();
        {
            let remote = self.connector.connect(service)?;

            let glob = glob_for_pattern(&service.pattern);
            let listed = remote.list_matching(&service.directory, &glob)?;
            let selected = select_for_age(
                &listed,
                self.today,
                older_than(service.days_to_keep_on_remote),
            );
            report.files_listed = listed.len();
            report.files_selected = selected.len();
            debug!(
                listed = listed.len(),
                selected = selected.len(),
                "Selected files for archival"
            );

            let engine = TransferEngine::new(self.options.remove_remote, self.options.dry_run);
            let mut observer: Box<dyn ProgressObserver> = if self.options.verbose {
                Box::new(LogProgress::new())
            } else {
                Box::new(NoopProgress)
            };

            for remote_path in &selected {
                if self.is_shutting_down() {
                    warn!(
                        remaining = report.files_selected - report.fetched.len() - report.failed.len(),
                        "Shutdown requested, stopping before next file"
                    );
                    report.interrupted = true;
                    break;
                }

                match engine.fetch(remote.as_ref(), remote_path, &base_dir, observer.as_mut()) {
                    Ok(outcome) => report.fetched.push(outcome),
                    Err(e) => {
                        error!(remote_path = %remote_path, error = %e, "Failed to archive file");
                        report.failed.push(FailedFile {
                            remote_path: remote_path.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
            // Session closes here, before the local retention pass
        }

        match service.retention_period_days {
            Some(_) if report.interrupted => {
                info!("Skipping retention after interrupted transfer");
            }
            Some(days) => {
                let pruned = retention::prune(&base_dir, days, self.today, self.options.dry_run);
                report.pruned = pruned.deleted;
                report.prune_failures = pruned.failed;
            }
            None => {}
        }

        info!(
            archived = report.archived_count(),
            skipped = report.skipped_count(),
            failed = report.failed.len(),
            pruned = report.pruned.len(),
            "Unit complete"
        );
        Ok(report)
    }

    fn ensure_dir(&self, dir: &Path) -> Result<(), UnitError> {
        if dir.exists() {
            return Ok(());
        }
        if self.options.dry_run {
            info!(path = %dir.display(), "Would create local directory");
            return Ok(());
        }
        fs::create_dir_all(dir).map_err(|source| UnitError::LocalDirectory {
            path: dir.to_path_buf(),
            source,
        })
    }

    /// Process one unit and capture its outcome
    pub fn run_unit(&self, service: &Service) -> UnitResult {
        let outcome = if self.is_shutting_down() {
            Err(UnitError::Cancelled)
        } else {
            info!(service = %service.name, host = %service.host, "Handling unit");
            self.archive_service(service)
        };

        if let Err(e) = &outcome {
            error!(
                service = %service.name,
                host = %service.host,
                error = %e,
                "Error while processing unit"
            );
        }

        UnitResult {
            service: service.name.clone(),
            host: service.host.clone(),
            outcome,
        }
    }

    /// Process every unit in order, one after the other
    pub fn run(&self, services: &[Service]) -> RunSummary {
        RunSummary {
            units: services.iter().map(|s| self.run_unit(s)).collect(),
        }
    }
}

/// Process units on the blocking pool, at most `concurrency` at a time
///
/// Results come back in input order. Each unit still runs sequentially
/// inside its own task.
pub async fn run_concurrent(
    archiver: Arc<Archiver>,
    services: Vec<Service>,
    concurrency: usize,
) -> RunSummary {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(services.len());

    for service in services {
        let identity = (service.name.clone(), service.host.clone());
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                handles.push((identity, Err(UnitError::TaskFailed(e.to_string()))));
                continue;
            }
        };

        let archiver = Arc::clone(&archiver);
        let span = tracing::Span::current();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            span.in_scope(|| archiver.run_unit(&service))
        });
        handles.push((identity, Ok(handle)));
    }

    let mut summary = RunSummary::default();
    for ((service, host), handle) in handles {
        let result = match handle {
            Ok(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(service = %service, host = %host, error = %e, "Unit task failed");
                    UnitResult {
                        service,
                        host,
                        outcome: Err(UnitError::TaskFailed(e.to_string())),
                    }
                }
            },
            Err(e) => UnitResult {
                service,
                host,
                outcome: Err(e),
            },
        };
        summary.units.push(result);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::remote::{MemoryRemote, MockRemoteConnector, MockRemoteFs, RemoteFile, RemoteFs};
    use std::io::Cursor;
    use mockall::predicate::*;
    use tempfile::TempDir;

    fn service(host: &str) -> Service {
        Service {
            name: "webapp".to_string(),
            host: host.to_string(),
            account: "deploy".to_string(),
            directory: "/var/log/webapp".to_string(),
            pattern: "access-<DATE>.log".to_string(),
            days_to_keep_on_remote: 7,
            retention_period_days: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 21).unwrap()
    }

    #[test]
    fn test_unreachable_host_does_not_stop_run() {
        let tmp = TempDir::new().unwrap();
        let remote = MemoryRemote::new();
        remote.add_file("/var/log/webapp/access-2024-01-01.log", "a");

        let mut connector = MockRemoteConnector::new();
        connector
            .expect_connect()
            .withf(|s: &Service| s.host == "down")
            .times(1)
            .returning(|s| {
                Err(TransportError::Connect {
                    host: s.host.clone(),
                    reason: "connection refused".to_string(),
                })
            });
        let handle = remote.clone();
        connector
            .expect_connect()
            .withf(|s: &Service| s.host == "up")
            .times(1)
            .returning(move |_| Ok(Box::new(handle.clone()) as Box<dyn RemoteFs>));

        let archiver = Archiver::new(
            tmp.path(),
            Arc::new(connector),
            RunOptions::default(),
            today(),
        );
        let summary = archiver.run(&[service("down"), service("up")]);

        assert_eq!(summary.units.len(), 2);
        assert!(matches!(
            summary.units[0].outcome,
            Err(UnitError::Transport(TransportError::Connect { .. }))
        ));
        let report = summary.units[1].outcome.as_ref().unwrap();
        assert_eq!(report.archived_count(), 1);
        assert!(tmp
            .path()
            .join("webapp/up/access-2024-01-01.log.gz")
            .exists());
    }

    #[test]
    fn test_shutdown_flag_cancels_pending_units() {
        let tmp = TempDir::new().unwrap();
        let mut connector = MockRemoteConnector::new();
        connector.expect_connect().never();

        let flag = Arc::new(AtomicBool::new(true));
        let archiver = Archiver::new(
            tmp.path(),
            Arc::new(connector),
            RunOptions::default(),
            today(),
        )
        .with_shutdown_flag(flag);

        let summary = archiver.run(&[service("h1")]);
        assert!(matches!(summary.units[0].outcome, Err(UnitError::Cancelled)));
    }

    #[test]
    fn test_dry_run_creates_no_directories() {
        let tmp = TempDir::new().unwrap();
        let remote = MemoryRemote::new();
        remote.add_file("/var/log/webapp/access-2024-01-01.log", "a");

        let mut connector = MockRemoteConnector::new();
        let handle = remote.clone();
        connector
            .expect_connect()
            .with(eq(service("h1")))
            .returning(move |_| Ok(Box::new(handle.clone()) as Box<dyn RemoteFs>));

        let options = RunOptions {
            dry_run: true,
            remove_remote: true,
            verbose: true,
        };
        let archiver = Archiver::new(tmp.path(), Arc::new(connector), options, today());
        let report = archiver.archive_service(&service("h1")).unwrap();

        assert_eq!(report.files_selected, 1);
        assert_eq!(report.archived_count(), 0);
        assert!(!tmp.path().join("webapp").exists());
        assert!(remote.removed().is_empty());
    }

    #[test]
    fn test_pattern_without_placeholder_lists_with_verbatim_glob() {
        let tmp = TempDir::new().unwrap();
        let mut remote = MockRemoteFs::new();
        remote
            .expect_list_matching()
            .with(eq("/var/log/webapp"), eq("access-*.log"))
            .times(1)
            .returning(|_, _| {
                Ok(vec![
                    "/var/log/webapp/access-2024-01-01.log".to_string(),
                    "/var/log/webapp/access-current.log".to_string(),
                ])
            });
        remote
            .expect_open()
            .with(eq("/var/log/webapp/access-2024-01-01.log"))
            .times(1)
            .returning(|_| {
                Ok(RemoteFile {
                    size: Some(5),
                    reader: Box::new(Cursor::new(b"hello".to_vec())),
                })
            });
        remote.expect_remove().never();

        let mut connector = MockRemoteConnector::new();
        connector
            .expect_connect()
            .return_once(move |_| Ok(Box::new(remote) as Box<dyn RemoteFs>));

        let mut service = service("h1");
        service.pattern = "access-*.log".to_string();
        let archiver = Archiver::new(
            tmp.path(),
            Arc::new(connector),
            RunOptions::default(),
            today(),
        );
        let report = archiver.archive_service(&service).unwrap();

        assert_eq!(report.files_listed, 2);
        assert_eq!(report.files_selected, 1);
        assert_eq!(report.archived_count(), 1);
        assert!(tmp
            .path()
            .join("webapp/h1/access-2024-01-01.log.gz")
            .exists());
    }

    #[tokio::test]
    async fn test_run_concurrent_preserves_input_order() {
        let tmp = TempDir::new().unwrap();
        let mut connector = MockRemoteConnector::new();
        connector
            .expect_connect()
            .returning(|_| Ok(Box::new(MemoryRemote::new()) as Box<dyn RemoteFs>));

        let archiver = Arc::new(Archiver::new(
            tmp.path(),
            Arc::new(connector),
            RunOptions::default(),
            today(),
        ));
        let services: Vec<Service> = ["h1", "h2", "h3", "h4"].iter().map(|h| service(h)).collect();
        let summary = run_concurrent(archiver, services, 3).await;

        let hosts: Vec<&str> = summary.units.iter().map(|u| u.host.as_str()).collect();
        assert_eq!(hosts, vec!["h1", "h2", "h3", "h4"]);
        assert_eq!(summary.failed_units(), 0);
    }
}
