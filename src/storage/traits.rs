//! Storage seams. Each component talks to one of these traits so another
//! relational backend can stand in for SQLite.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::audit::{AuditDigest, AuditEntry, AuditStats, PendingAuditEntry};
use crate::error::Result;
use crate::rotation::{EncryptedColumnSpec, RotationRecord};
use crate::secrets::{RotationAuditRecord, SecretRotationCommit, SecretState, SecretVersion};

/// A row of encrypted cells, aligned with `EncryptedColumnSpec::columns`.
/// `None` is a SQL NULL and is never rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedRow {
    pub id: i64,
    pub cells: Vec<Option<String>>,
}

/// Identifies the key pair a progress marker belongs to.
#[derive(Debug, Clone, Copy)]
pub struct RotationMarker<'a> {
    pub old_fingerprint: &'a str,
    pub new_fingerprint: &'a str,
}

/// Enumeration and update of rows holding encrypted columns.
///
/// Not `Sync`: the view handed to `with_transaction` borrows a single
/// connection. Shared handles are `Arc<dyn RowStore + Send + Sync>`.
pub trait RowStore {
    /// Stable name of the underlying database; equal for every handle
    /// opened on the same store within this process.
    fn store_id(&self) -> &str;

    /// Column names of `table`; empty when the table does not exist.
    fn table_columns(&self, table: &str) -> Result<Vec<String>>;

    fn count_rows(&self, table: &str) -> Result<u64>;

    /// Up to `limit` rows with key greater than `after`, in key order.
    fn fetch_batch(
        &self,
        spec: &EncryptedColumnSpec,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<EncryptedRow>>;

    /// Ids in `[min_id, max_id]` already carrying a marker for this key pair.
    fn migrated_rows(
        &self,
        marker: RotationMarker<'_>,
        table: &str,
        min_id: i64,
        max_id: i64,
    ) -> Result<HashSet<i64>>;

    /// Write the row's non-null cells and its progress marker, all or nothing.
    /// Markers left on the row by earlier key pairs are dropped in the same
    /// step, since the row is no longer under their new key.
    fn write_row(
        &self,
        spec: &EncryptedColumnSpec,
        marker: RotationMarker<'_>,
        row: &EncryptedRow,
    ) -> Result<()>;

    fn purge_markers(&self, old_fingerprint: &str, new_fingerprint: &str) -> Result<u64>;

    /// Run `work` inside one transaction. Commits when it returns `Ok(true)`,
    /// rolls back on `Ok(false)` or `Err`.
    fn with_transaction(&self, work: &mut dyn FnMut(&dyn RowStore) -> Result<bool>) -> Result<bool>;
}

/// Persistence for `key_rotations` job records.
pub trait RotationLedger: Send + Sync {
    fn insert_rotation(&self, record: &RotationRecord) -> Result<()>;

    /// Overwrite status, timestamps, result and error of an existing record.
    fn update_rotation(&self, record: &RotationRecord) -> Result<()>;

    fn get_rotation(&self, job_id: &str) -> Result<Option<RotationRecord>>;

    /// Move a pending record to running. False if it was not pending.
    fn claim_rotation(&self, job_id: &str, started_at: DateTime<Utc>) -> Result<bool>;

    fn due_rotations(&self, now: DateTime<Utc>) -> Result<Vec<RotationRecord>>;

    /// Newest first.
    fn rotation_history(&self, limit: usize) -> Result<Vec<RotationRecord>>;
}

/// Persistence for versioned secrets and their rotation audit trail.
pub trait SecretStore: Send + Sync {
    fn secret_state(&self, name: &str) -> Result<Option<SecretState>>;

    fn secret_states(&self) -> Result<Vec<SecretState>>;

    /// Apply a rotation atomically. Returns the number of pruned versions.
    /// Fails with `Error::RotationConflict` if the active version moved.
    fn commit_rotation(&self, commit: &SecretRotationCommit<'_>) -> Result<u64>;

    fn active_version(&self, name: &str) -> Result<Option<SecretVersion>>;

    /// Active version plus versions still valid and not expired at `now`, newest first.
    fn verification_versions(&self, name: &str, now: DateTime<Utc>) -> Result<Vec<SecretVersion>>;

    /// All versions, newest first.
    fn versions(&self, name: &str) -> Result<Vec<SecretVersion>>;

    /// Flag non-active versions with `expires_at <= now` invalid. Returns the count.
    fn invalidate_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    fn record_rotation_audit(&self, record: &RotationAuditRecord) -> Result<()>;

    /// Newest first.
    fn rotation_audit(&self, name: &str, limit: usize) -> Result<Vec<RotationAuditRecord>>;
}

/// Persistence for the hash-chained audit log.
pub trait AuditStore: Send + Sync {
    /// Id and `curr_hash` of the last entry.
    fn head(&self) -> Result<Option<(i64, String)>>;

    /// Insert `entry` only if the head hash still equals `entry.prev_hash`.
    /// Returns the new id, or `None` when the head moved.
    fn insert_if_head(&self, entry: &PendingAuditEntry) -> Result<Option<i64>>;

    /// Entries with `start <= id <= end` in id order.
    fn entries(&self, start: Option<i64>, end: Option<i64>) -> Result<Vec<AuditEntry>>;

    /// The entry immediately preceding `id`.
    fn entry_before(&self, id: i64) -> Result<Option<AuditEntry>>;

    fn entries_by_actor(&self, actor_id: &str, limit: usize) -> Result<Vec<AuditEntry>>;

    fn entries_by_entity(
        &self,
        entity: &str,
        entity_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>>;

    /// Entries with `from <= ts <= to`, in id order.
    fn entries_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AuditEntry>>;

    fn stats(&self, since: Option<DateTime<Utc>>, top: usize) -> Result<AuditStats>;

    fn insert_digest(&self, digest: &AuditDigest) -> Result<i64>;

    /// Newest first.
    fn digests(&self) -> Result<Vec<AuditDigest>>;
}
