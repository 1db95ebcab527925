use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

/// True for a plain SQL identifier that is safe to interpolate (quoted).
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

fn default_key_column() -> String {
    "id".to_string()
}

/// A table and the ordered list of columns holding encrypted values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedColumnSpec {
    pub table: String,
    /// Integer primary key used for ordering and resumption.
    #[serde(default = "default_key_column")]
    pub key_column: String,
    pub columns: Vec<String>,
}

impl EncryptedColumnSpec {
    pub fn new<S: Into<String>>(table: impl Into<String>, columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            table: table.into(),
            key_column: default_key_column(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_key_column(mut self, key_column: impl Into<String>) -> Self {
        self.key_column = key_column.into();
        self
    }

    /// Shape checks that need no store access.
    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(Error::Validation("table name is empty".into()));
        }
        if self.columns.is_empty() {
            return Err(Error::Validation(format!(
                "no encrypted columns given for table \"{}\"",
                self.table
            )));
        }
        for name in std::iter::once(&self.table)
            .chain(std::iter::once(&self.key_column))
            .chain(self.columns.iter())
        {
            if !is_identifier(name) {
                return Err(Error::Validation(format!("invalid identifier \"{}\"", name)));
            }
        }
        for (i, column) in self.columns.iter().enumerate() {
            if column == &self.key_column {
                return Err(Error::Validation(format!(
                    "key column \"{}\" cannot be rotated",
                    column
                )));
            }
            if self.columns[..i].contains(column) {
                return Err(Error::Validation(format!("column \"{}\" listed twice", column)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    PartialFailure,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::PartialFailure => "partial_failure",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "partial_failure" => JobStatus::PartialFailure,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationType {
    Manual,
    Scheduled,
    Emergency,
}

impl RotationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationType::Manual => "manual",
            RotationType::Scheduled => "scheduled",
            RotationType::Emergency => "emergency",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "manual" => RotationType::Manual,
            "scheduled" => RotationType::Scheduled,
            "emergency" => RotationType::Emergency,
            _ => return None,
        })
    }
}

/// Shared flag checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RotationOptions {
    /// Rows per batch; `None` uses the configured default.
    pub batch_size: Option<usize>,
    pub dry_run: bool,
    /// Run every table in one transaction and roll back on any failure.
    pub atomic: bool,
    /// Rotate distinct tables concurrently. Ignored when `atomic` is set.
    pub parallel: bool,
    /// Tables for `rotate_all_keys`; `None` uses the configured registry.
    pub tables: Option<Vec<EncryptedColumnSpec>>,
    pub cancel: Option<CancellationFlag>,
    pub created_by: Option<String>,
}

impl RotationOptions {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationFlag::is_cancelled)
    }
}

/// One row that could not be rotated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row_id: i64,
    /// Column whose value failed; `None` when the row write itself failed.
    pub column: Option<String>,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationResult {
    pub table: String,
    pub columns: Vec<String>,
    pub status: JobStatus,
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    /// Rows already migrated by an earlier run of the same key pair.
    pub skipped: u64,
    pub errors: Vec<RowError>,
    pub duration_ms: u64,
    /// Table-level failure (setup error or aborted batch).
    pub error: Option<String>,
}

impl RotationResult {
    pub(crate) fn failed_setup(spec: &EncryptedColumnSpec, err: &Error) -> Self {
        Self {
            table: spec.table.clone(),
            columns: spec.columns.clone(),
            status: JobStatus::Failed,
            total: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            duration_ms: 0,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRotationResult {
    pub job_id: String,
    pub old_key_fingerprint: String,
    pub new_key_fingerprint: String,
    pub status: JobStatus,
    pub dry_run: bool,
    pub atomic: bool,
    /// Set when an atomic run was rolled back; no write from this job persists.
    pub rolled_back: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub tables: Vec<RotationResult>,
    pub total_rows: u64,
    pub total_successful: u64,
    pub total_failed: u64,
    pub total_skipped: u64,
    /// Job-level failure that prevented any table from running.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub old_key_valid: bool,
    pub new_key_valid: bool,
    pub keys_distinct: bool,
    pub old_key_round_trip: bool,
    pub new_key_round_trip: bool,
    pub checks_passed: u32,
    pub checks_failed: u32,
    pub errors: Vec<String>,
    pub ready: bool,
}

/// Request to record a future rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationSchedule {
    pub old_key_fingerprint: String,
    pub new_key_fingerprint: String,
    pub rotation_type: RotationType,
    /// `None` means "now".
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
}

/// A row of the `key_rotations` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationRecord {
    pub job_id: String,
    pub old_key_fingerprint: String,
    pub new_key_fingerprint: String,
    pub rotation_type: RotationType,
    pub status: JobStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<AggregateRotationResult>,
    pub error: Option<String>,
}

pub type ScheduledRotation = RotationRecord;
