use std::collections::HashSet;

use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection};

use super::{quote, scalar_u64, SqliteBackend};
use crate::error::{Error, Result, StorageError};
use crate::rotation::EncryptedColumnSpec;
use crate::storage::traits::{EncryptedRow, RotationMarker, RowStore};

const ROW_SAVEPOINT: &str = "keyward_row";

/// Row access over a borrowed connection, used both directly and as the
/// view handed to `with_transaction` callbacks.
pub(crate) struct SqliteRows<'c> {
    conn: &'c Connection,
    store_id: &'c str,
    in_transaction: bool,
}

impl<'c> SqliteRows<'c> {
    pub(crate) fn new(conn: &'c Connection, store_id: &'c str, in_transaction: bool) -> Self {
        Self {
            conn,
            store_id,
            in_transaction,
        }
    }

    fn update_row(&self, spec: &EncryptedColumnSpec, marker: RotationMarker<'_>, row: &EncryptedRow) -> Result<()> {
        let mut assignments = Vec::new();
        let mut values: Vec<&str> = Vec::new();
        for (column, cell) in spec.columns.iter().zip(&row.cells) {
            if let Some(value) = cell {
                values.push(value);
                assignments.push(format!("{} = ?{}", quote(column), values.len()));
            }
        }

        if !assignments.is_empty() {
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?{}",
                quote(&spec.table),
                assignments.join(", "),
                quote(&spec.key_column),
                values.len() + 1,
            );
            let id = row.id.to_string();
            let mut bound: Vec<&dyn rusqlite::ToSql> =
                values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
            bound.push(&row.id);
            let changed = self.conn.execute(&sql, params_from_iter(bound))?;
            if changed != 1 {
                return Err(StorageError::Conflict(format!(
                    "row {} of {} changed {} rows",
                    id, spec.table, changed
                ))
                .into());
            }
        }

        // The cells now sit under the new key, so any marker from an
        // earlier pair (e.g. the reverse rotation) no longer holds.
        self.conn.execute(
            "DELETE FROM key_rotation_progress WHERE table_name = ?1 AND row_id = ?2",
            params![spec.table, row.id],
        )?;
        self.conn.execute(
            "INSERT INTO key_rotation_progress
                 (old_key_fingerprint, new_key_fingerprint, table_name, row_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![marker.old_fingerprint, marker.new_fingerprint, spec.table, row.id],
        )?;
        Ok(())
    }
}

fn cell_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
    }
}

impl RowStore for SqliteRows<'_> {
    fn store_id(&self) -> &str {
        self.store_id
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote(table)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    fn count_rows(&self, table: &str) -> Result<u64> {
        scalar_u64(self.conn, &format!("SELECT COUNT(*) FROM {}", quote(table)), [])
    }

    fn fetch_batch(
        &self,
        spec: &EncryptedColumnSpec,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<EncryptedRow>> {
        let columns: Vec<String> = spec.columns.iter().map(|c| quote(c)).collect();
        let key = quote(&spec.key_column);
        let sql = format!(
            "SELECT {key}, {cols} FROM {table} WHERE ?1 IS NULL OR {key} > ?1 ORDER BY {key} LIMIT ?2",
            key = key,
            cols = columns.join(", "),
            table = quote(&spec.table),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let width = spec.columns.len();
        let rows = stmt
            .query_map(params![after, limit as i64], |row| {
                let id: i64 = row.get(0)?;
                let mut cells = Vec::with_capacity(width);
                for i in 0..width {
                    cells.push(cell_text(row.get_ref(i + 1)?));
                }
                Ok(EncryptedRow { id, cells })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn migrated_rows(
        &self,
        marker: RotationMarker<'_>,
        table: &str,
        min_id: i64,
        max_id: i64,
    ) -> Result<HashSet<i64>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT row_id FROM key_rotation_progress
             WHERE old_key_fingerprint = ?1 AND new_key_fingerprint = ?2
               AND table_name = ?3 AND row_id BETWEEN ?4 AND ?5",
        )?;
        let ids = stmt
            .query_map(
                params![marker.old_fingerprint, marker.new_fingerprint, table, min_id, max_id],
                |row| row.get::<_, i64>(0),
            )?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    fn write_row(
        &self,
        spec: &EncryptedColumnSpec,
        marker: RotationMarker<'_>,
        row: &EncryptedRow,
    ) -> Result<()> {
        self.conn.execute_batch(&format!("SAVEPOINT {}", ROW_SAVEPOINT))?;
        match self.update_row(spec, marker, row) {
            Ok(()) => {
                self.conn
                    .execute_batch(&format!("RELEASE {}", ROW_SAVEPOINT))?;
                Ok(())
            }
            Err(e) => {
                let _ = self.conn.execute_batch(&format!(
                    "ROLLBACK TO {sp}; RELEASE {sp}",
                    sp = ROW_SAVEPOINT
                ));
                Err(e)
            }
        }
    }

    fn purge_markers(&self, old_fingerprint: &str, new_fingerprint: &str) -> Result<u64> {
        let n = self.conn.execute(
            "DELETE FROM key_rotation_progress
             WHERE old_key_fingerprint = ?1 AND new_key_fingerprint = ?2",
            params![old_fingerprint, new_fingerprint],
        )?;
        Ok(n as u64)
    }

    fn with_transaction(&self, work: &mut dyn FnMut(&dyn RowStore) -> Result<bool>) -> Result<bool> {
        if self.in_transaction {
            return Err(Error::Validation("transactions cannot be nested".into()));
        }
        run_transaction(self.conn, self.store_id, work)
    }
}

fn run_transaction(
    conn: &Connection,
    store_id: &str,
    work: &mut dyn FnMut(&dyn RowStore) -> Result<bool>,
) -> Result<bool> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    let scoped = SqliteRows::new(conn, store_id, true);
    match work(&scoped) {
        Ok(true) => {
            if let Err(e) = conn.execute_batch("COMMIT") {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e.into());
            }
            Ok(true)
        }
        Ok(false) => {
            conn.execute_batch("ROLLBACK")?;
            Ok(false)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

impl RowStore for SqliteBackend {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        self.rows(|r| r.table_columns(table))
    }

    fn count_rows(&self, table: &str) -> Result<u64> {
        self.rows(|r| r.count_rows(table))
    }

    fn fetch_batch(
        &self,
        spec: &EncryptedColumnSpec,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<EncryptedRow>> {
        self.rows(|r| r.fetch_batch(spec, after, limit))
    }

    fn migrated_rows(
        &self,
        marker: RotationMarker<'_>,
        table: &str,
        min_id: i64,
        max_id: i64,
    ) -> Result<HashSet<i64>> {
        self.rows(|r| r.migrated_rows(marker, table, min_id, max_id))
    }

    fn write_row(
        &self,
        spec: &EncryptedColumnSpec,
        marker: RotationMarker<'_>,
        row: &EncryptedRow,
    ) -> Result<()> {
        self.rows(|r| r.write_row(spec, marker, row))
    }

    fn purge_markers(&self, old_fingerprint: &str, new_fingerprint: &str) -> Result<u64> {
        self.rows(|r| r.purge_markers(old_fingerprint, new_fingerprint))
    }

    fn with_transaction(&self, work: &mut dyn FnMut(&dyn RowStore) -> Result<bool>) -> Result<bool> {
        let conn = self.lock();
        run_transaction(&conn, &self.store_id, work)
    }
}
