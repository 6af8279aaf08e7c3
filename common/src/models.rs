use crate::errors::UnitError;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::path::PathBuf;

// Helper for serializing a unit outcome, whose error side is not serde-aware
fn serialize_outcome<S>(
    outcome: &Result<UnitReport, UnitError>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match outcome {
        Ok(report) => {
            let mut state = serializer.serialize_struct("Outcome", 2)?;
            state.serialize_field("status", "completed")?;
            state.serialize_field("report", report)?;
            state.end()
        }
        Err(e) => {
            let mut state = serializer.serialize_struct("Outcome", 2)?;
            state.serialize_field("status", "failed")?;
            state.serialize_field("error", &e.to_string())?;
            state.end()
        }
    }
}

// ============================================================================
// Service Models
// ============================================================================

/// One archival policy bound to a single remote host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Archive namespace, first path segment under the archive root
    pub name: String,
    pub host: String,
    /// Remote login
    pub account: String,
    /// Remote search root
    pub directory: String,
    /// Filename pattern containing a date placeholder, e.g. `access-<DATE>.log`
    pub pattern: String,
    /// Files this many days old or newer stay on the remote
    pub days_to_keep_on_remote: u32,
    /// Local files older than this are pruned; `None` disables pruning
    pub retention_period_days: Option<u32>,
}

// ============================================================================
// Transfer Models
// ============================================================================

/// Result of fetching one remote file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Transferred and promoted to its final name
    Archived {
        local_path: PathBuf,
        bytes_written: u64,
        remote_removed: bool,
    },
    /// Final name already present, nothing was done
    AlreadyArchived { local_path: PathBuf },
    /// Dry run, nothing was done
    Planned { local_path: PathBuf },
}

impl FetchOutcome {
    pub fn local_path(&self) -> &PathBuf {
        match self {
            FetchOutcome::Archived { local_path, .. }
            | FetchOutcome::AlreadyArchived { local_path }
            | FetchOutcome::Planned { local_path } => local_path,
        }
    }
}

/// A remote file that could not be archived
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub remote_path: String,
    pub error: String,
}

/// A local file the pruner selected but could not delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPrune {
    pub path: PathBuf,
    pub error: String,
}

// ============================================================================
// Run Models
// ============================================================================

/// What happened while processing one (service, host) unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    pub files_listed: usize,
    pub files_selected: usize,
    pub fetched: Vec<FetchOutcome>,
    pub failed: Vec<FailedFile>,
    pub pruned: Vec<PathBuf>,
    pub prune_failures: Vec<FailedPrune>,
    /// Set when a shutdown request cut the file list short
    pub interrupted: bool,
}

impl UnitReport {
    pub fn archived_count(&self) -> usize {
        self.fetched
            .iter()
            .filter(|o| matches!(o, FetchOutcome::Archived { .. }))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.fetched
            .iter()
            .filter(|o| matches!(o, FetchOutcome::AlreadyArchived { .. }))
            .count()
    }
}

/// Outcome of one unit, success or failure with cause
#[derive(Debug, Serialize)]
pub struct UnitResult {
    pub service: String,
    pub host: String,
    #[serde(serialize_with = "serialize_outcome")]
    pub outcome: Result<UnitReport, UnitError>,
}

impl UnitResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Aggregate of every unit processed in one run
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub units: Vec<UnitResult>,
}

impl RunSummary {
    pub fn failed_units(&self) -> usize {
        self.units.iter().filter(|u| !u.is_success()).count()
    }

    pub fn archived_files(&self) -> usize {
        self.reports().map(UnitReport::archived_count).sum()
    }

    pub fn failed_files(&self) -> usize {
        self.reports().map(|r| r.failed.len()).sum()
    }

    pub fn pruned_files(&self) -> usize {
        self.reports().map(|r| r.pruned.len()).sum()
    }

    fn reports(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter_map(|u| u.outcome.as_ref().ok())
    }
}
