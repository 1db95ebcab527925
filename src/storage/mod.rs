#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

pub use traits::{AuditStore, EncryptedRow, RotationLedger, RotationMarker, RowStore, SecretStore};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Result, StorageError};

/// Stored timestamp form: RFC 3339, microseconds, `Z` suffix. Sorts lexically.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp {:?}: {}", raw, e)).into())
}
