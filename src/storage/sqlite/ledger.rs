use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{corrupt, opt_ts, SqliteBackend};
use crate::error::Result;
use crate::rotation::{JobStatus, RotationRecord, RotationType};
use crate::storage::traits::RotationLedger;
use crate::storage::{format_ts, parse_ts};

const COLUMNS: &str = "job_id, old_key_fingerprint, new_key_fingerprint, rotation_type, status,
     scheduled_at, created_by, created_at, started_at, completed_at, result, error";

struct RawRecord {
    job_id: String,
    old_fp: String,
    new_fp: String,
    rotation_type: String,
    status: String,
    scheduled_at: Option<String>,
    created_by: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    result: Option<String>,
    error: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            old_fp: row.get(1)?,
            new_fp: row.get(2)?,
            rotation_type: row.get(3)?,
            status: row.get(4)?,
            scheduled_at: row.get(5)?,
            created_by: row.get(6)?,
            created_at: row.get(7)?,
            started_at: row.get(8)?,
            completed_at: row.get(9)?,
            result: row.get(10)?,
            error: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<RotationRecord> {
        Ok(RotationRecord {
            rotation_type: RotationType::parse(&self.rotation_type)
                .ok_or_else(|| corrupt("rotation type", &self.rotation_type))?,
            status: JobStatus::parse(&self.status).ok_or_else(|| corrupt("job status", &self.status))?,
            scheduled_at: opt_ts(self.scheduled_at)?,
            created_at: parse_ts(&self.created_at)?,
            started_at: opt_ts(self.started_at)?,
            completed_at: opt_ts(self.completed_at)?,
            result: self.result.as_deref().map(serde_json::from_str).transpose()?,
            job_id: self.job_id,
            old_key_fingerprint: self.old_fp,
            new_key_fingerprint: self.new_fp,
            created_by: self.created_by,
            error: self.error,
        })
    }
}

fn result_json(record: &RotationRecord) -> Result<Option<String>> {
    Ok(record.result.as_ref().map(serde_json::to_string).transpose()?)
}

impl SqliteBackend {
    fn query_records(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<RotationRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, RawRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawRecord::into_record).collect()
    }
}

impl RotationLedger for SqliteBackend {
    fn insert_rotation(&self, record: &RotationRecord) -> Result<()> {
        let result = result_json(record)?;
        self.lock().execute(
            &format!("INSERT INTO key_rotations ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
            params![
                record.job_id,
                record.old_key_fingerprint,
                record.new_key_fingerprint,
                record.rotation_type.as_str(),
                record.status.as_str(),
                record.scheduled_at.as_ref().map(format_ts),
                record.created_by,
                format_ts(&record.created_at),
                record.started_at.as_ref().map(format_ts),
                record.completed_at.as_ref().map(format_ts),
                result,
                record.error,
            ],
        )?;
        Ok(())
    }

    fn update_rotation(&self, record: &RotationRecord) -> Result<()> {
        let result = result_json(record)?;
        let changed = self.lock().execute(
            "UPDATE key_rotations
             SET status = ?2, started_at = ?3, completed_at = ?4, result = ?5, error = ?6
             WHERE job_id = ?1",
            params![
                record.job_id,
                record.status.as_str(),
                record.started_at.as_ref().map(format_ts),
                record.completed_at.as_ref().map(format_ts),
                result,
                record.error,
            ],
        )?;
        if changed == 0 {
            return Err(crate::Error::NotFound {
                kind: "rotation",
                id: record.job_id.clone(),
            });
        }
        Ok(())
    }

    fn get_rotation(&self, job_id: &str) -> Result<Option<RotationRecord>> {
        let raw = self
            .lock()
            .query_row(
                &format!("SELECT {COLUMNS} FROM key_rotations WHERE job_id = ?1"),
                params![job_id],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    fn claim_rotation(&self, job_id: &str, started_at: DateTime<Utc>) -> Result<bool> {
        let changed = self.lock().execute(
            "UPDATE key_rotations SET status = 'running', started_at = ?2
             WHERE job_id = ?1 AND status = 'pending'",
            params![job_id, format_ts(&started_at)],
        )?;
        Ok(changed == 1)
    }

    fn due_rotations(&self, now: DateTime<Utc>) -> Result<Vec<RotationRecord>> {
        self.query_records(
            &format!(
                "SELECT {COLUMNS} FROM key_rotations
                 WHERE status = 'pending' AND (scheduled_at IS NULL OR scheduled_at <= ?1)
                 ORDER BY scheduled_at, id"
            ),
            params![format_ts(&now)],
        )
    }

    fn rotation_history(&self, limit: usize) -> Result<Vec<RotationRecord>> {
        self.query_records(
            &format!("SELECT {COLUMNS} FROM key_rotations ORDER BY created_at DESC, id DESC LIMIT ?1"),
            params![limit as i64],
        )
    }
}
