use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{corrupt, immediate, opt_ts, SqliteBackend};
use crate::error::{Error, Result, StorageError};
use crate::secrets::{
    AuditStatus, RotationAuditRecord, SecretRotationCommit, SecretState, SecretVersion,
};
use crate::storage::traits::SecretStore;
use crate::storage::{format_ts, parse_ts};

const STATE_SQL: &str = "SELECT s.id, s.secret_name, s.active_version, s.last_rotation, s.next_rotation,
            COALESCE((SELECT MAX(version) FROM secret_versions v WHERE v.secret_id = s.id), 0)
     FROM secrets_rotation s";

const VERSION_SQL: &str = "SELECT s.secret_name, v.version, v.value_protected, v.created_at, v.expires_at,
            v.is_active, v.is_valid_for_verification
     FROM secret_versions v JOIN secrets_rotation s ON s.id = v.secret_id";

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, Option<u32>, Option<String>, Option<String>, u32)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
}

fn into_state(
    (id, secret_name, active_version, last, next, latest_version): (i64, String, Option<u32>, Option<String>, Option<String>, u32),
) -> Result<SecretState> {
    Ok(SecretState {
        id,
        secret_name,
        active_version,
        latest_version,
        last_rotation: opt_ts(last)?,
        next_rotation: opt_ts(next)?,
    })
}

type RawVersion = (String, u32, String, String, Option<String>, bool, bool);

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<RawVersion> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_version(raw: RawVersion) -> Result<SecretVersion> {
    let (secret_name, version, value_protected, created_at, expires_at, is_active, valid) = raw;
    Ok(SecretVersion {
        secret_name,
        version,
        value_protected,
        created_at: parse_ts(&created_at)?,
        expires_at: opt_ts(expires_at)?,
        is_active,
        is_valid_for_verification: valid,
    })
}

fn query_versions(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<SecretVersion>> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map(params, version_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.into_iter().map(into_version).collect()
}

/// Map a constraint violation during a rotation commit to a lost race.
fn conflict_as_race(name: &str) -> impl Fn(Error) -> Error + '_ {
    move |err| match err {
        Error::Storage(StorageError::Conflict(_)) => Error::RotationConflict(name.to_string()),
        other => other,
    }
}

fn apply_rotation(conn: &Connection, c: &SecretRotationCommit<'_>) -> Result<u64> {
    let name = c.secret_name;
    let created = format_ts(&c.created_at);
    let next = format_ts(&c.next_rotation);

    // Claim: the active version must still be what the caller observed.
    let secret_id: i64 = match c.expected_active {
        None => {
            let existing: Option<(i64, Option<u32>)> = conn
                .query_row(
                    "SELECT id, active_version FROM secrets_rotation WHERE secret_name = ?1",
                    params![name],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            match existing {
                Some((id, None)) => {
                    conn.execute(
                        "UPDATE secrets_rotation
                         SET active_version = ?2, last_rotation = ?3, next_rotation = ?4
                         WHERE id = ?1 AND active_version IS NULL",
                        params![id, c.new_version, created, next],
                    )?;
                    id
                }
                Some((_, Some(_))) => return Err(Error::RotationConflict(name.to_string())),
                None => {
                    conn.execute(
                        "INSERT INTO secrets_rotation (secret_name, active_version, last_rotation, next_rotation)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![name, c.new_version, created, next],
                    )?;
                    conn.last_insert_rowid()
                }
            }
        }
        Some(expected) => {
            let claimed: Option<i64> = conn
                .query_row(
                    "UPDATE secrets_rotation
                     SET active_version = ?3, last_rotation = ?4, next_rotation = ?5
                     WHERE secret_name = ?1 AND active_version = ?2
                     RETURNING id",
                    params![name, expected, c.new_version, created, next],
                    |r| r.get(0),
                )
                .optional()?;
            let id = claimed.ok_or_else(|| Error::RotationConflict(name.to_string()))?;
            conn.execute(
                "UPDATE secret_versions SET is_active = 0, expires_at = ?3
                 WHERE secret_id = ?1 AND version = ?2",
                params![id, expected, format_ts(&c.demoted_expires_at)],
            )?;
            id
        }
    };

    conn.execute(
        "INSERT INTO secret_versions
             (secret_id, version, value_protected, created_at, expires_at, is_active, is_valid_for_verification)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, 1)",
        params![secret_id, c.new_version, c.value_protected, created, format_ts(&c.expires_at)],
    )?;

    // Prune oldest versions beyond the limit, but only those no longer valid.
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM secret_versions WHERE secret_id = ?1",
        params![secret_id],
        |r| r.get(0),
    )?;
    let excess = count - i64::from(c.max_versions_kept);
    let pruned = if excess > 0 {
        conn.execute(
            "DELETE FROM secret_versions WHERE id IN (
                 SELECT id FROM secret_versions
                 WHERE secret_id = ?1 AND is_active = 0 AND is_valid_for_verification = 0
                 ORDER BY version ASC LIMIT ?2)",
            params![secret_id, excess],
        )?
    } else {
        0
    };

    conn.execute(
        "INSERT INTO rotation_audit
             (secret_name, action, old_version, new_version, triggered_by, status, created_at)
         VALUES (?1, 'ROTATE', ?2, ?3, ?4, 'SUCCESS', ?5)",
        params![name, c.expected_active, c.new_version, c.triggered_by, created],
    )?;

    Ok(pruned as u64)
}

impl SecretStore for SqliteBackend {
    fn secret_state(&self, name: &str) -> Result<Option<SecretState>> {
        let raw = self
            .lock()
            .query_row(
                &format!("{STATE_SQL} WHERE s.secret_name = ?1"),
                params![name],
                state_from_row,
            )
            .optional()?;
        raw.map(into_state).transpose()
    }

    fn secret_states(&self) -> Result<Vec<SecretState>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("{STATE_SQL} ORDER BY s.secret_name"))?;
        let raw = stmt
            .query_map([], state_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(into_state).collect()
    }

    fn commit_rotation(&self, commit: &SecretRotationCommit<'_>) -> Result<u64> {
        let conn = self.lock();
        immediate(&conn, |conn| apply_rotation(conn, commit))
            .map_err(conflict_as_race(commit.secret_name))
    }

    fn active_version(&self, name: &str) -> Result<Option<SecretVersion>> {
        let mut versions = query_versions(
            &self.lock(),
            &format!("{VERSION_SQL} WHERE s.secret_name = ?1 AND v.is_active = 1"),
            params![name],
        )?;
        Ok(versions.pop())
    }

    fn verification_versions(&self, name: &str, now: DateTime<Utc>) -> Result<Vec<SecretVersion>> {
        query_versions(
            &self.lock(),
            &format!(
                "{VERSION_SQL}
                 WHERE s.secret_name = ?1
                   AND (v.is_active = 1
                        OR (v.is_valid_for_verification = 1
                            AND (v.expires_at IS NULL OR v.expires_at > ?2)))
                 ORDER BY v.version DESC"
            ),
            params![name, format_ts(&now)],
        )
    }

    fn versions(&self, name: &str) -> Result<Vec<SecretVersion>> {
        query_versions(
            &self.lock(),
            &format!("{VERSION_SQL} WHERE s.secret_name = ?1 ORDER BY v.version DESC"),
            params![name],
        )
    }

    fn invalidate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let n = self.lock().execute(
            "UPDATE secret_versions SET is_valid_for_verification = 0
             WHERE is_active = 0 AND is_valid_for_verification = 1
               AND expires_at IS NOT NULL AND expires_at <= ?1",
            params![format_ts(&now)],
        )?;
        Ok(n as u64)
    }

    fn record_rotation_audit(&self, record: &RotationAuditRecord) -> Result<()> {
        self.lock().execute(
            "INSERT INTO rotation_audit
                 (secret_name, action, old_version, new_version, triggered_by, status, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.secret_name,
                record.action,
                record.old_version,
                record.new_version,
                record.triggered_by,
                record.status.as_str(),
                record.error_message,
                format_ts(&record.created_at),
            ],
        )?;
        Ok(())
    }

    fn rotation_audit(&self, name: &str, limit: usize) -> Result<Vec<RotationAuditRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, secret_name, action, old_version, new_version, triggered_by, status,
                    error_message, created_at
             FROM rotation_audit WHERE secret_name = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let raw = stmt
            .query_map(params![name, limit as i64], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<u32>>(3)?,
                    r.get::<_, Option<u32>>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                    r.get::<_, Option<String>>(7)?,
                    r.get::<_, String>(8)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter()
            .map(
                |(id, secret_name, action, old_version, new_version, triggered_by, status, error_message, created_at)| {
                    Ok(RotationAuditRecord {
                        id: Some(id),
                        secret_name,
                        action,
                        old_version,
                        new_version,
                        triggered_by,
                        status: AuditStatus::parse(&status).ok_or_else(|| corrupt("audit status", &status))?,
                        error_message,
                        created_at: parse_ts(&created_at)?,
                    })
                },
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn commit<'a>(name: &'a str, expected: Option<u32>, version: u32, now: DateTime<Utc>) -> SecretRotationCommit<'a> {
        SecretRotationCommit {
            secret_name: name,
            expected_active: expected,
            new_version: version,
            value_protected: "blob",
            created_at: now,
            expires_at: now + Duration::days(120),
            demoted_expires_at: now + Duration::days(30),
            next_rotation: now + Duration::days(90),
            max_versions_kept: 2,
            triggered_by: "test",
        }
    }

    #[test]
    fn first_and_second_rotation() {
        let b = SqliteBackend::open_in_memory().unwrap();
        let now = Utc::now();
        b.commit_rotation(&commit("JWT", None, 1, now)).unwrap();
        b.commit_rotation(&commit("JWT", Some(1), 2, now)).unwrap();

        let state = b.secret_state("JWT").unwrap().unwrap();
        assert_eq!(state.active_version, Some(2));
        assert_eq!(state.latest_version, 2);

        let versions = b.versions("JWT").unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].is_active && !versions[1].is_active);
        assert!(versions[1].is_valid_for_verification);
        assert_eq!(b.rotation_audit("JWT", 10).unwrap().len(), 2);
    }

    #[test]
    fn stale_claim_is_conflict() {
        let b = SqliteBackend::open_in_memory().unwrap();
        let now = Utc::now();
        b.commit_rotation(&commit("JWT", None, 1, now)).unwrap();
        b.commit_rotation(&commit("JWT", Some(1), 2, now)).unwrap();
        let err = b.commit_rotation(&commit("JWT", Some(1), 2, now)).unwrap_err();
        assert!(matches!(err, Error::RotationConflict(_)));
        let err = b.commit_rotation(&commit("JWT", None, 1, now)).unwrap_err();
        assert!(matches!(err, Error::RotationConflict(_)));
        assert_eq!(b.versions("JWT").unwrap().len(), 2);
    }

    #[test]
    fn expiry_sweep_and_pruning() {
        let b = SqliteBackend::open_in_memory().unwrap();
        let now = Utc::now();
        b.commit_rotation(&commit("K", None, 1, now)).unwrap();
        b.commit_rotation(&commit("K", Some(1), 2, now)).unwrap();

        let later = now + Duration::days(31);
        assert_eq!(b.verification_versions("K", later).unwrap().len(), 1);
        assert_eq!(b.invalidate_expired(later).unwrap(), 1);
        assert_eq!(b.invalidate_expired(later).unwrap(), 0);

        // Third version pushes the count over the limit; v1 is invalid and goes.
        let pruned = b.commit_rotation(&commit("K", Some(2), 3, later)).unwrap();
        assert_eq!(pruned, 1);
        let kept: Vec<u32> = b.versions("K").unwrap().iter().map(|v| v.version).collect();
        assert_eq!(kept, [3, 2]);
    }
}
