use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{immediate, opt_ts, scalar_u64, SqliteBackend};
use crate::audit::{
    ActionCount, AuditDigest, AuditEntry, AuditStats, PendingAuditEntry, GENESIS_HASH,
};
use crate::error::{Error, Result, StorageError};
use crate::storage::traits::AuditStore;
use crate::storage::{format_ts, parse_ts};

const ENTRY_SQL: &str = "SELECT id, actor_id, action, entity, entity_id, payload, ts, prev_hash, curr_hash
     FROM audit_log_immutable";

type RawEntry = (i64, Option<String>, String, String, Option<String>, String, String, String, String);

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn into_entry(raw: RawEntry) -> Result<AuditEntry> {
    let (id, actor_id, action, entity, entity_id, payload, ts, prev_hash, curr_hash) = raw;
    Ok(AuditEntry {
        id,
        actor_id,
        action,
        entity,
        entity_id,
        payload: serde_json::from_str(&payload)?,
        ts: parse_ts(&ts)?,
        prev_hash,
        curr_hash,
    })
}

fn query_entries(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map(params, entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.into_iter().map(into_entry).collect()
}

fn head(conn: &Connection) -> Result<Option<(i64, String)>> {
    Ok(conn
        .query_row(
            "SELECT id, curr_hash FROM audit_log_immutable ORDER BY id DESC LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?)
}

impl AuditStore for SqliteBackend {
    fn head(&self) -> Result<Option<(i64, String)>> {
        head(&self.lock())
    }

    fn insert_if_head(&self, entry: &PendingAuditEntry) -> Result<Option<i64>> {
        let conn = self.lock();
        let inserted = immediate(&conn, |conn| {
            let current = head(conn)?.map(|(_, hash)| hash);
            if current.as_deref().unwrap_or(GENESIS_HASH) != entry.prev_hash {
                return Ok(None);
            }
            conn.execute(
                "INSERT INTO audit_log_immutable
                     (actor_id, action, entity, entity_id, payload, ts, prev_hash, curr_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.actor_id,
                    entry.action,
                    entry.entity,
                    entry.entity_id,
                    entry.payload_json,
                    format_ts(&entry.ts),
                    entry.prev_hash,
                    entry.curr_hash,
                ],
            )?;
            Ok(Some(conn.last_insert_rowid()))
        });
        match inserted {
            // A duplicate prev_hash means another writer linked to the same head.
            Err(Error::Storage(StorageError::Conflict(_))) => Ok(None),
            other => other,
        }
    }

    fn entries(&self, start: Option<i64>, end: Option<i64>) -> Result<Vec<AuditEntry>> {
        query_entries(
            &self.lock(),
            &format!(
                "{ENTRY_SQL} WHERE (?1 IS NULL OR id >= ?1) AND (?2 IS NULL OR id <= ?2) ORDER BY id"
            ),
            params![start, end],
        )
    }

    fn entry_before(&self, id: i64) -> Result<Option<AuditEntry>> {
        let mut entries = query_entries(
            &self.lock(),
            &format!("{ENTRY_SQL} WHERE id < ?1 ORDER BY id DESC LIMIT 1"),
            params![id],
        )?;
        Ok(entries.pop())
    }

    fn entries_by_actor(&self, actor_id: &str, limit: usize) -> Result<Vec<AuditEntry>> {
        query_entries(
            &self.lock(),
            &format!("{ENTRY_SQL} WHERE actor_id = ?1 ORDER BY id DESC LIMIT ?2"),
            params![actor_id, limit as i64],
        )
    }

    fn entries_by_entity(
        &self,
        entity: &str,
        entity_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>> {
        query_entries(
            &self.lock(),
            &format!(
                "{ENTRY_SQL} WHERE entity = ?1 AND (?2 IS NULL OR entity_id = ?2)
                 ORDER BY id DESC LIMIT ?3"
            ),
            params![entity, entity_id, limit as i64],
        )
    }

    fn entries_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AuditEntry>> {
        query_entries(
            &self.lock(),
            &format!("{ENTRY_SQL} WHERE ts >= ?1 AND ts <= ?2 ORDER BY id"),
            params![format_ts(&from), format_ts(&to)],
        )
    }

    fn stats(&self, since: Option<DateTime<Utc>>, top: usize) -> Result<AuditStats> {
        let conn = self.lock();
        let since = since.as_ref().map(format_ts);
        let filter = "WHERE (?1 IS NULL OR ts >= ?1)";

        let (total, actors, actions, first, last): (i64, i64, i64, Option<String>, Option<String>) =
            conn.query_row(
                &format!(
                    "SELECT COUNT(*), COUNT(DISTINCT actor_id), COUNT(DISTINCT action), MIN(ts), MAX(ts)
                     FROM audit_log_immutable {filter}"
                ),
                params![since],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT action, COUNT(*) AS n FROM audit_log_immutable {filter}
             GROUP BY action ORDER BY n DESC, action LIMIT ?2"
        ))?;
        let top_actions = stmt
            .query_map(params![since, top as i64], |r| {
                Ok(ActionCount {
                    action: r.get(0)?,
                    count: r.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(AuditStats {
            total_entries: total as u64,
            unique_actors: actors as u64,
            unique_actions: actions as u64,
            first_entry: opt_ts(first)?,
            last_entry: opt_ts(last)?,
            top_actions,
        })
    }

    fn insert_digest(&self, digest: &AuditDigest) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO audit_digests
                 (period_start, period_end, entry_count, first_entry_id, last_entry_id,
                  head_hash, digest_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                format_ts(&digest.period_start),
                format_ts(&digest.period_end),
                digest.entry_count as i64,
                digest.first_entry_id,
                digest.last_entry_id,
                digest.head_hash,
                digest.digest_hash,
                format_ts(&digest.created_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn digests(&self) -> Result<Vec<AuditDigest>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, period_start, period_end, entry_count, first_entry_id, last_entry_id,
                    head_hash, digest_hash, created_at
             FROM audit_digests ORDER BY id DESC",
        )?;
        let raw = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, Option<i64>>(4)?,
                    r.get::<_, Option<i64>>(5)?,
                    r.get::<_, String>(6)?,
                    r.get::<_, String>(7)?,
                    r.get::<_, String>(8)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter()
            .map(|(id, start, end, count, first, last, head_hash, digest_hash, created)| {
                Ok(AuditDigest {
                    id: Some(id),
                    period_start: parse_ts(&start)?,
                    period_end: parse_ts(&end)?,
                    entry_count: count as u64,
                    first_entry_id: first,
                    last_entry_id: last,
                    head_hash,
                    digest_hash,
                    created_at: parse_ts(&created)?,
                })
            })
            .collect()
    }
}

impl SqliteBackend {
    /// Number of stored audit entries.
    pub fn audit_entry_count(&self) -> Result<u64> {
        scalar_u64(&self.lock(), "SELECT COUNT(*) FROM audit_log_immutable", [])
    }
}
