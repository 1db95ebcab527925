use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SubsecRound, Utc};
use keyward_crypto::{CryptoError, EncryptedValue, KeyCipher, SymmetricKey};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::locks::{table_locks, TableGuard};
use super::types::{
    AggregateRotationResult, EncryptedColumnSpec, JobStatus, RotationOptions, RotationRecord,
    RotationResult, RotationSchedule, RotationType, RowError, ScheduledRotation, ValidationReport,
};
use crate::clock::Clock;
use crate::config::RotationConfig;
use crate::error::{Error, Result};
use crate::storage::{EncryptedRow, RotationLedger, RotationMarker, RowStore};

/// Looks up caller-held keys by fingerprint for scheduled rotations.
/// Keys are never persisted; only their fingerprints are.
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, fingerprint: &str) -> Result<Option<SymmetricKey>>;
}

/// Result of one scheduled rotation run by [`KeyRotationCoordinator::run_due_rotations`].
#[derive(Debug)]
pub struct ScheduledRunOutcome {
    pub job_id: String,
    pub outcome: Result<AggregateRotationResult>,
}

/// Keys and marker shared by every table of one job.
struct JobKeys<'a> {
    old: KeyCipher,
    new: KeyCipher,
    marker: RotationMarker<'a>,
}

/// Table locks are shared by every coordinator in the process that works
/// on the same store (see [`RowStore::store_id`]).
pub struct KeyRotationCoordinator {
    rows: Arc<dyn RowStore + Send + Sync>,
    ledger: Arc<dyn RotationLedger>,
    clock: Arc<dyn Clock>,
    config: RotationConfig,
}

impl KeyRotationCoordinator {
    pub fn new(
        rows: Arc<dyn RowStore + Send + Sync>,
        ledger: Arc<dyn RotationLedger>,
        clock: Arc<dyn Clock>,
        config: RotationConfig,
    ) -> Self {
        Self {
            rows,
            ledger,
            clock,
            config,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    /// Pre-flight check of two hex keys: format, distinctness and an
    /// encrypt/decrypt self-test with each. Never touches stored rows.
    pub fn validate_rotation(&self, old_key_hex: &str, new_key_hex: &str) -> ValidationReport {
        fn check(report: &mut ValidationReport, passed: bool, message: &str) -> bool {
            if passed {
                report.checks_passed += 1;
            } else {
                report.checks_failed += 1;
                report.errors.push(message.to_string());
            }
            passed
        }

        let mut report = ValidationReport::default();

        let old = SymmetricKey::from_hex(old_key_hex).ok();
        report.old_key_valid = check(
            &mut report,
            old.is_some(),
            "Old key must be 64 hex characters (256 bits)",
        );
        let new = SymmetricKey::from_hex(new_key_hex).ok();
        report.new_key_valid = check(
            &mut report,
            new.is_some(),
            "New key must be 64 hex characters (256 bits)",
        );

        if let (Some(old), Some(new)) = (&old, &new) {
            report.keys_distinct = check(
                &mut report,
                old.fingerprint() != new.fingerprint(),
                "Old and new keys are identical",
            );
            report.old_key_round_trip = check(
                &mut report,
                self_test(old),
                "Old key failed the encrypt/decrypt self-test",
            );
            report.new_key_round_trip = check(
                &mut report,
                self_test(new),
                "New key failed the encrypt/decrypt self-test",
            );
        }

        report.ready = report.checks_failed == 0 && report.old_key_valid && report.new_key_valid;
        info!(
            ready = report.ready,
            passed = report.checks_passed,
            failed = report.checks_failed,
            "rotation pre-flight validation"
        );
        report
    }

    /// Rotate one table outside of any job record.
    ///
    /// Setup problems (bad spec, missing columns, identical keys, table
    /// already locked) are returned as errors before any row is touched.
    /// Row problems are accumulated in the result.
    pub fn rotate_table(
        &self,
        spec: &EncryptedColumnSpec,
        old_key: &SymmetricKey,
        new_key: &SymmetricKey,
        options: &RotationOptions,
    ) -> Result<RotationResult> {
        let batch_size = self.batch_size(options)?;
        ensure_distinct(old_key, new_key)?;
        preflight(self.rows.as_ref(), spec)?;
        let _guard = self.lock_table(&spec.table)?;

        let (old_fp, new_fp) = (old_key.fingerprint(), new_key.fingerprint());
        let keys = JobKeys {
            old: KeyCipher::new(old_key),
            new: KeyCipher::new(new_key),
            marker: RotationMarker {
                old_fingerprint: &old_fp,
                new_fingerprint: &new_fp,
            },
        };
        Ok(process_table(self.rows.as_ref(), spec, &keys, batch_size, options))
    }

    /// Rotate every configured (or requested) table as one recorded job.
    pub fn rotate_all_keys(
        &self,
        old_key: &SymmetricKey,
        new_key: &SymmetricKey,
        options: &RotationOptions,
    ) -> Result<AggregateRotationResult> {
        let tables = self.tables(options)?;
        let batch_size = self.batch_size(options)?;
        ensure_distinct(old_key, new_key)?;

        let now = self.now();
        let record = RotationRecord {
            job_id: Uuid::new_v4().to_string(),
            old_key_fingerprint: old_key.fingerprint(),
            new_key_fingerprint: new_key.fingerprint(),
            rotation_type: RotationType::Manual,
            status: JobStatus::Running,
            scheduled_at: None,
            created_by: options.created_by.clone(),
            created_at: now,
            started_at: Some(now),
            completed_at: None,
            result: None,
            error: None,
        };
        self.ledger.insert_rotation(&record)?;

        let result = self.execute(&record, &tables, old_key, new_key, batch_size, options);
        self.finalize(record, &result);
        Ok(result)
    }

    /// Record a rotation to run later.
    pub fn schedule_key_rotation(&self, schedule: RotationSchedule) -> Result<ScheduledRotation> {
        for fp in [&schedule.old_key_fingerprint, &schedule.new_key_fingerprint] {
            if fp.len() != 16 || !fp.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::Validation(format!(
                    "\"{}\" is not a key fingerprint (16 hex characters)",
                    fp
                )));
            }
        }
        if schedule.old_key_fingerprint == schedule.new_key_fingerprint {
            return Err(Error::Validation("old and new key fingerprints are identical".into()));
        }

        let now = self.now();
        let record = RotationRecord {
            job_id: Uuid::new_v4().to_string(),
            old_key_fingerprint: schedule.old_key_fingerprint,
            new_key_fingerprint: schedule.new_key_fingerprint,
            rotation_type: schedule.rotation_type,
            status: JobStatus::Pending,
            scheduled_at: Some(schedule.scheduled_at.unwrap_or(now)),
            created_by: schedule.created_by,
            created_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        };
        self.ledger.insert_rotation(&record)?;
        info!(
            job_id = %record.job_id,
            scheduled_at = ?record.scheduled_at,
            old_fingerprint = %record.old_key_fingerprint,
            new_fingerprint = %record.new_key_fingerprint,
            "key rotation scheduled"
        );
        Ok(record)
    }

    /// Pending schedules whose time has come.
    pub fn due_rotations(&self) -> Result<Vec<ScheduledRotation>> {
        self.ledger.due_rotations(self.now())
    }

    /// Run a pending schedule now, resolving its keys through `resolver`.
    pub fn run_scheduled_rotation(
        &self,
        job_id: &str,
        resolver: &dyn KeyResolver,
        options: &RotationOptions,
    ) -> Result<AggregateRotationResult> {
        let mut record = self.ledger.get_rotation(job_id)?.ok_or_else(|| Error::NotFound {
            kind: "rotation",
            id: job_id.to_string(),
        })?;
        if record.status != JobStatus::Pending {
            return Err(Error::Validation(format!(
                "rotation {} is {}, not pending",
                job_id,
                record.status.as_str()
            )));
        }

        let started = self.now();
        if !self.ledger.claim_rotation(job_id, started)? {
            return Err(Error::JobFailure(format!(
                "rotation {} was claimed by another runner",
                job_id
            )));
        }
        record.status = JobStatus::Running;
        record.started_at = Some(started);

        let setup = (|| -> Result<_> {
            let old = resolve(resolver, &record.old_key_fingerprint)?;
            let new = resolve(resolver, &record.new_key_fingerprint)?;
            let tables = self.tables(options)?;
            let batch_size = self.batch_size(options)?;
            Ok((old, new, tables, batch_size))
        })();

        let (old, new, tables, batch_size) = match setup {
            Ok(setup) => setup,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "scheduled rotation failed before start");
                record.status = JobStatus::Failed;
                record.completed_at = Some(self.now());
                record.error = Some(e.to_string());
                if let Err(le) = self.ledger.update_rotation(&record) {
                    warn!(job_id = %job_id, error = %le, "failed to record rotation failure");
                }
                return Err(e);
            }
        };

        let result = self.execute(&record, &tables, &old, &new, batch_size, options);
        self.finalize(record, &result);
        Ok(result)
    }

    /// Run every due schedule. One failure does not stop the others.
    pub fn run_due_rotations(
        &self,
        resolver: &dyn KeyResolver,
        options: &RotationOptions,
    ) -> Result<Vec<ScheduledRunOutcome>> {
        let due = self.due_rotations()?;
        Ok(due
            .into_iter()
            .map(|record| ScheduledRunOutcome {
                outcome: self.run_scheduled_rotation(&record.job_id, resolver, options),
                job_id: record.job_id,
            })
            .collect())
    }

    /// Drop the per-row progress markers of a finished key pair.
    pub fn purge_progress_markers(&self, old_fingerprint: &str, new_fingerprint: &str) -> Result<u64> {
        let purged = self.rows.purge_markers(old_fingerprint, new_fingerprint)?;
        info!(
            old_fingerprint = %old_fingerprint,
            new_fingerprint = %new_fingerprint,
            purged,
            "rotation progress markers purged"
        );
        Ok(purged)
    }

    /// Job records, newest first.
    pub fn rotation_history(&self, limit: usize) -> Result<Vec<RotationRecord>> {
        self.ledger.rotation_history(limit)
    }

    pub fn is_table_locked(&self, table: &str) -> bool {
        table_locks().is_locked(self.rows.store_id(), table)
    }

    fn lock_table(&self, table: &str) -> Result<TableGuard<'static>> {
        table_locks().try_acquire(self.rows.store_id(), table)
    }

    fn batch_size(&self, options: &RotationOptions) -> Result<usize> {
        match options.batch_size.unwrap_or(self.config.batch_size) {
            0 => Err(Error::Validation("batch size must be positive".into())),
            n => Ok(n),
        }
    }

    fn tables(&self, options: &RotationOptions) -> Result<Vec<EncryptedColumnSpec>> {
        let tables = options
            .tables
            .clone()
            .unwrap_or_else(|| self.config.tables.clone());
        if tables.is_empty() {
            return Err(Error::Validation("no tables to rotate".into()));
        }
        for (i, spec) in tables.iter().enumerate() {
            if tables[..i].iter().any(|t| t.table == spec.table) {
                return Err(Error::Validation(format!("table \"{}\" listed twice", spec.table)));
            }
        }
        Ok(tables)
    }

    fn execute(
        &self,
        record: &RotationRecord,
        tables: &[EncryptedColumnSpec],
        old_key: &SymmetricKey,
        new_key: &SymmetricKey,
        batch_size: usize,
        options: &RotationOptions,
    ) -> AggregateRotationResult {
        let started = Instant::now();
        let keys = JobKeys {
            old: KeyCipher::new(old_key),
            new: KeyCipher::new(new_key),
            marker: RotationMarker {
                old_fingerprint: &record.old_key_fingerprint,
                new_fingerprint: &record.new_key_fingerprint,
            },
        };
        info!(
            job_id = %record.job_id,
            tables = tables.len(),
            dry_run = options.dry_run,
            atomic = options.atomic,
            parallel = options.parallel,
            "key rotation started"
        );

        let (results, rolled_back, error) = if options.atomic {
            self.execute_atomic(tables, &keys, batch_size, options)
        } else if options.parallel && tables.len() > 1 {
            (self.execute_parallel(tables, &keys, batch_size, options), false, None)
        } else {
            let results = tables
                .iter()
                .map(|spec| self.rotate_locked(self.rows.as_ref(), spec, &keys, batch_size, options))
                .collect();
            (results, false, None)
        };

        let aggregate = aggregate(
            record,
            results,
            options,
            rolled_back,
            error,
            started.elapsed().as_millis() as u64,
            self.now(),
        );
        info!(
            job_id = %aggregate.job_id,
            status = aggregate.status.as_str(),
            successful = aggregate.total_successful,
            failed = aggregate.total_failed,
            skipped = aggregate.total_skipped,
            rolled_back = aggregate.rolled_back,
            duration_ms = aggregate.duration_ms,
            "key rotation finished"
        );
        aggregate
    }

    /// Pre-flight, lock and process one table; setup errors become a failed result.
    fn rotate_locked(
        &self,
        rows: &dyn RowStore,
        spec: &EncryptedColumnSpec,
        keys: &JobKeys<'_>,
        batch_size: usize,
        options: &RotationOptions,
    ) -> RotationResult {
        let setup = preflight(rows, spec).and_then(|()| self.lock_table(&spec.table));
        match setup {
            Ok(_guard) => process_table(rows, spec, keys, batch_size, options),
            Err(e) => {
                warn!(table = %spec.table, error = %e, "table rotation could not start");
                RotationResult::failed_setup(spec, &e)
            }
        }
    }

    fn execute_parallel(
        &self,
        tables: &[EncryptedColumnSpec],
        keys: &JobKeys<'_>,
        batch_size: usize,
        options: &RotationOptions,
    ) -> Vec<RotationResult> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = tables
                .iter()
                .map(|spec| {
                    scope.spawn(move || self.rotate_locked(self.rows.as_ref(), spec, keys, batch_size, options))
                })
                .collect();
            handles
                .into_iter()
                .zip(tables)
                .map(|(handle, spec)| {
                    handle.join().unwrap_or_else(|_| {
                        error!(table = %spec.table, "table rotation worker panicked");
                        RotationResult::failed_setup(
                            spec,
                            &Error::JobFailure("table rotation worker panicked".into()),
                        )
                    })
                })
                .collect()
        })
    }

    /// All tables in one store transaction; committed only if every table
    /// completes without a failed row.
    fn execute_atomic(
        &self,
        tables: &[EncryptedColumnSpec],
        keys: &JobKeys<'_>,
        batch_size: usize,
        options: &RotationOptions,
    ) -> (Vec<RotationResult>, bool, Option<String>) {
        let mut guards: Vec<TableGuard<'static>> = Vec::with_capacity(tables.len());
        let mut setup_failures = Vec::new();
        for spec in tables {
            match preflight(self.rows.as_ref(), spec).and_then(|()| self.lock_table(&spec.table)) {
                Ok(guard) => guards.push(guard),
                Err(e) => setup_failures.push((spec, e)),
            }
        }
        if !setup_failures.is_empty() {
            let results = tables
                .iter()
                .map(|spec| match setup_failures.iter().find(|(s, _)| s.table == spec.table) {
                    Some((_, e)) => RotationResult::failed_setup(spec, e),
                    None => RotationResult::failed_setup(
                        spec,
                        &Error::JobFailure("atomic rotation aborted by another table".into()),
                    ),
                })
                .collect();
            return (results, false, Some("atomic rotation aborted during pre-flight".into()));
        }

        let mut results = Vec::with_capacity(tables.len());
        let outcome = self.rows.with_transaction(&mut |tx: &dyn RowStore| {
            results.clear();
            for spec in tables {
                let result = process_table(tx, spec, keys, batch_size, options);
                let clean = result.status == JobStatus::Completed;
                results.push(result);
                if !clean {
                    return Ok(false);
                }
            }
            Ok(!options.dry_run)
        });
        drop(guards);

        match outcome {
            Ok(true) => (results, false, None),
            Ok(false) => {
                let rolled_back = !options.dry_run;
                if rolled_back {
                    warn!("atomic key rotation rolled back");
                }
                (results, rolled_back, None)
            }
            Err(e) => {
                error!(error = %e, "atomic key rotation transaction failed");
                let rolled_back = !results.is_empty() && !options.dry_run;
                (results, rolled_back, Some(e.to_string()))
            }
        }
    }

    fn finalize(&self, mut record: RotationRecord, result: &AggregateRotationResult) {
        record.status = result.status;
        record.completed_at = Some(result.completed_at);
        record.error = result.error.clone();
        record.result = Some(result.clone());
        if let Err(e) = self.ledger.update_rotation(&record) {
            error!(job_id = %record.job_id, error = %e, "failed to persist rotation result");
        }
    }
}

fn ensure_distinct(old_key: &SymmetricKey, new_key: &SymmetricKey) -> Result<()> {
    if old_key.as_bytes() == new_key.as_bytes() {
        return Err(Error::Validation("old and new keys are identical".into()));
    }
    Ok(())
}

fn resolve(resolver: &dyn KeyResolver, fingerprint: &str) -> Result<SymmetricKey> {
    let key = resolver
        .resolve(fingerprint)?
        .ok_or_else(|| Error::JobFailure(format!("no key available for fingerprint {}", fingerprint)))?;
    if key.fingerprint() != fingerprint {
        return Err(Error::Validation(format!(
            "resolved key has fingerprint {}, expected {}",
            key.fingerprint(),
            fingerprint
        )));
    }
    Ok(key)
}

fn self_test(key: &SymmetricKey) -> bool {
    let cipher = KeyCipher::new(key);
    let probe = format!("keyward-probe-{}", Uuid::new_v4());
    cipher
        .encrypt_str(&probe, None)
        .and_then(|encoded| cipher.decrypt_str(&encoded, None))
        .is_ok_and(|decrypted| decrypted.as_str() == probe)
}

/// Spec shape plus schema checks. Store failures here abort the job.
fn preflight(rows: &dyn RowStore, spec: &EncryptedColumnSpec) -> Result<()> {
    spec.validate()?;
    let existing = rows.table_columns(&spec.table).map_err(|e| match e {
        Error::Storage(inner) => Error::JobFailure(format!(
            "reading schema of \"{}\": {}",
            spec.table, inner
        )),
        other => other,
    })?;
    if existing.is_empty() {
        return Err(Error::Validation(format!("table \"{}\" does not exist", spec.table)));
    }
    let missing: Vec<&str> = std::iter::once(&spec.key_column)
        .chain(spec.columns.iter())
        .filter(|c| !existing.contains(c))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(Error::Validation(format!(
            "table \"{}\" has no column(s) {}",
            spec.table,
            missing.join(", ")
        )));
    }
    Ok(())
}

fn row_error(row_id: i64, column: Option<&str>, err: Error) -> RowError {
    RowError {
        row_id,
        column: column.map(str::to_string),
        kind: err.kind().to_string(),
        message: err.to_string(),
    }
}

/// Re-encrypt every non-null cell, or report the first cell that fails.
fn reencrypt_row(
    row: &EncryptedRow,
    spec: &EncryptedColumnSpec,
    keys: &JobKeys<'_>,
) -> std::result::Result<EncryptedRow, RowError> {
    let mut cells = Vec::with_capacity(row.cells.len());
    for (column, cell) in spec.columns.iter().zip(&row.cells) {
        let Some(encoded) = cell else {
            cells.push(None);
            continue;
        };
        let rotated = EncryptedValue::decode(encoded)
            .and_then(|value| keys.old.decrypt(&value, None))
            .and_then(|plaintext| keys.new.encrypt(&plaintext, None))
            .map(|value| value.encode())
            .map_err(|e: CryptoError| row_error(row.id, Some(column), e.into()))?;
        cells.push(Some(rotated));
    }
    Ok(EncryptedRow { id: row.id, cells })
}

fn process_table(
    rows: &dyn RowStore,
    spec: &EncryptedColumnSpec,
    keys: &JobKeys<'_>,
    batch_size: usize,
    options: &RotationOptions,
) -> RotationResult {
    let started = Instant::now();
    let mut result = RotationResult {
        table: spec.table.clone(),
        columns: spec.columns.clone(),
        status: JobStatus::Running,
        total: 0,
        successful: 0,
        failed: 0,
        skipped: 0,
        errors: Vec::new(),
        duration_ms: 0,
        error: None,
    };

    let mut aborted = false;
    let mut cancelled = false;
    match rows.count_rows(&spec.table) {
        Ok(total) => result.total = total,
        Err(e) => {
            result.error = Some(e.to_string());
            aborted = true;
        }
    }
    let batches = result.total.div_ceil(batch_size as u64);
    info!(
        table = %spec.table,
        total = result.total,
        batches,
        dry_run = options.dry_run,
        "table rotation started"
    );

    let mut after = None;
    let mut batch_no = 0u64;
    while !aborted {
        if options.is_cancelled() {
            cancelled = true;
            break;
        }
        let batch = match rows.fetch_batch(spec, after, batch_size) {
            Ok(batch) => batch,
            Err(e) => {
                error!(table = %spec.table, error = %e, "fetching rotation batch failed");
                result.error = Some(e.to_string());
                aborted = true;
                break;
            }
        };
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            break;
        };
        after = Some(last.id);
        batch_no += 1;

        let migrated = match rows.migrated_rows(keys.marker, &spec.table, first.id, last.id) {
            Ok(ids) => ids,
            Err(e) => {
                error!(table = %spec.table, error = %e, "reading rotation progress failed");
                result.error = Some(e.to_string());
                aborted = true;
                break;
            }
        };

        for row in &batch {
            if migrated.contains(&row.id) {
                result.skipped += 1;
                continue;
            }
            let rotated = match reencrypt_row(row, spec, keys) {
                Ok(rotated) => rotated,
                Err(row_err) => {
                    debug!(table = %spec.table, row_id = row.id, kind = %row_err.kind, "row rotation failed");
                    result.failed += 1;
                    result.errors.push(row_err);
                    continue;
                }
            };
            if !options.dry_run {
                if let Err(e) = rows.write_row(spec, keys.marker, &rotated) {
                    warn!(table = %spec.table, row_id = row.id, error = %e, "row write failed");
                    result.failed += 1;
                    result.errors.push(row_error(row.id, None, e));
                    continue;
                }
            }
            result.successful += 1;
        }
        debug!(
            table = %spec.table,
            batch = batch_no,
            of = batches,
            successful = result.successful,
            failed = result.failed,
            "rotation batch done"
        );
    }

    result.status = if cancelled {
        JobStatus::Cancelled
    } else if aborted {
        if result.successful > 0 || result.failed > 0 || result.skipped > 0 {
            JobStatus::PartialFailure
        } else {
            JobStatus::Failed
        }
    } else if result.failed == 0 {
        JobStatus::Completed
    } else {
        JobStatus::PartialFailure
    };
    result.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        table = %spec.table,
        status = result.status.as_str(),
        successful = result.successful,
        failed = result.failed,
        skipped = result.skipped,
        duration_ms = result.duration_ms,
        "table rotation finished"
    );
    result
}

fn aggregate(
    record: &RotationRecord,
    tables: Vec<RotationResult>,
    options: &RotationOptions,
    rolled_back: bool,
    error: Option<String>,
    duration_ms: u64,
    completed_at: DateTime<Utc>,
) -> AggregateRotationResult {
    let total_rows = tables.iter().map(|t| t.total).sum();
    let total_successful = tables.iter().map(|t| t.successful).sum();
    let total_failed = tables.iter().map(|t| t.failed).sum();
    let total_skipped = tables.iter().map(|t| t.skipped).sum();

    let status = if tables.iter().any(|t| t.status == JobStatus::Cancelled) {
        JobStatus::Cancelled
    } else if rolled_back || error.is_some() || tables.iter().all(|t| t.status == JobStatus::Failed) {
        JobStatus::Failed
    } else if tables.iter().all(|t| t.status == JobStatus::Completed) {
        JobStatus::Completed
    } else {
        JobStatus::PartialFailure
    };

    AggregateRotationResult {
        job_id: record.job_id.clone(),
        old_key_fingerprint: record.old_key_fingerprint.clone(),
        new_key_fingerprint: record.new_key_fingerprint.clone(),
        status,
        dry_run: options.dry_run,
        atomic: options.atomic,
        rolled_back,
        started_at: record.started_at.unwrap_or(record.created_at),
        completed_at,
        duration_ms,
        tables,
        total_rows,
        total_successful,
        total_failed,
        total_skipped,
        error,
    }
}
