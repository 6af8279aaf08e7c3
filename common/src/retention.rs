// Local retention: delete archived files older than the retention window

use crate::dates::{older_than, select_for_age};
use crate::errors::RetentionError;
use crate::models::FailedPrune;
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;

/// What a pruning pass removed or failed to remove
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<FailedPrune>,
}

/// Collect every regular file below `root`, as paths relative to it
///
/// Unreadable entries are logged and skipped. A missing root yields nothing.
pub fn collect_files(root: &Path) -> Vec<String> {
    if !root.exists() {
        return Vec::new();
    }

    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                let err = RetentionError::Walk(e.to_string());
                warn!(root = %root.display(), error = %err, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            match relative.to_str() {
                Some(path) => Some(path.to_string()),
                None => {
                    debug!(path = %entry.path().display(), "Ignoring file with non UTF-8 name");
                    None
                }
            }
        })
        .collect()
}

/// Delete files under `root` dated more than `retention_days` before `today`
///
/// Dates are read from the path below `root` only, so a dated archive root
/// cannot expire everything beneath it. Files without a parseable date are
/// kept. Deletion failures are reported per file and do not stop the pass.
#[instrument(skip(today), fields(root = %root.display()))]
pub fn prune(root: &Path, retention_days: u32, today: NaiveDate, dry_run: bool) -> PruneReport {
    let files = collect_files(root);
    let expired = select_for_age(&files, today, older_than(retention_days));
    debug!(
        scanned = files.len(),
        expired = expired.len(),
        "Retention scan complete"
    );

    let mut report = PruneReport::default();
    for file in expired {
        let path = root.join(file);
        if dry_run {
            info!(path = %path.display(), "Would delete file due to retention policy");
            report.deleted.push(path);
            continue;
        }

        info!(path = %path.display(), "Deleting file due to retention policy");
        match fs::remove_file(&path) {
            Ok(()) => report.deleted.push(path),
            Err(source) => {
                let err = RetentionError::Io {
                    path: path.clone(),
                    source,
                };
                error!(error = %err, "Retention delete failed");
                report.failed.push(FailedPrune {
                    path,
                    error: err.to_string(),
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    fn dated(today: NaiveDate, days_ago: i64) -> String {
        (today - Duration::days(days_ago)).format("%Y-%m-%d").to_string()
    }

    #[test]
    fn test_prune_deletes_only_expired() {
        let tmp = TempDir::new().unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let old = tmp.path().join(format!("h1/app-{}.log.gz", dated(today, 40)));
        let recent = tmp.path().join(format!("h1/app-{}.log.gz", dated(today, 5)));
        let boundary = tmp.path().join(format!("h2/app-{}.log.gz", dated(today, 30)));
        let undated = tmp.path().join("h1/README");
        for p in [&old, &recent, &boundary, &undated] {
            touch(p);
        }

        let report = prune(tmp.path(), 30, today, false);

        assert_eq!(report.deleted, vec![old.clone()]);
        assert!(report.failed.is_empty());
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(boundary.exists());
        assert!(undated.exists());
    }

    #[test]
    fn test_prune_dry_run_keeps_files() {
        let tmp = TempDir::new().unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let old = tmp.path().join(format!("app-{}.log.gz", dated(today, 40)));
        touch(&old);

        let report = prune(tmp.path(), 30, today, true);
        assert_eq!(report.deleted, vec![old.clone()]);
        assert!(old.exists());
    }

    #[test]
    fn test_prune_ignores_dates_in_root_path() {
        let tmp = TempDir::new().unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let root = tmp.path().join("2001-01-01");
        let undated = root.join("h1/app.log.gz");
        touch(&undated);

        let report = prune(&root, 30, today, false);
        assert!(report.deleted.is_empty());
        assert!(undated.exists());
    }

    #[test]
    fn test_prune_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let report = prune(&tmp.path().join("missing"), 30, today, false);
        assert_eq!(report, PruneReport::default());
    }

    #[test]
    fn test_collect_files_skips_directories() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("2024-01-01")).unwrap();
        touch(&tmp.path().join("a/b.log"));
        let files = collect_files(tmp.path());
        assert_eq!(files, vec![format!("a{}b.log", std::path::MAIN_SEPARATOR)]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = TempDir::new().unwrap();
        let odd = tmp
            .path()
            .join(OsStr::from_bytes(b"access-2023-01-01-\xff.log.gz"));
        touch(&odd);
        touch(&tmp.path().join("access-2023-01-01.log.gz"));

        assert_eq!(collect_files(tmp.path()), vec!["access-2023-01-01.log.gz"]);

        let today = NaiveDate::from_ymd_opt(2024, 1, 21).unwrap();
        let report = prune(tmp.path(), 30, today, false);
        assert_eq!(report.deleted.len(), 1);
        assert!(odd.exists());
    }
}
