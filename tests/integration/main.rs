//! End-to-end tests against the SQLite backend.

mod audit;
mod rotation;
mod secrets;

use std::sync::Arc;

use keyward::crypto::{encrypt_to_string, SymmetricKey};
use keyward::SqliteBackend;

pub fn key_a() -> SymmetricKey {
    SymmetricKey::from_bytes(&[0u8; 32]).unwrap()
}

pub fn key_b() -> SymmetricKey {
    SymmetricKey::from_bytes(&[0x42u8; 32]).unwrap()
}

pub fn backend() -> Arc<SqliteBackend> {
    Arc::new(SqliteBackend::open_in_memory().unwrap())
}

/// Create `table (id, ssn, email)` with one row per entry, `None` cells stored as NULL.
pub fn seed_table(
    backend: &SqliteBackend,
    table: &str,
    key: &SymmetricKey,
    rows: &[(i64, Option<&str>, Option<&str>)],
) {
    backend
        .execute_batch(&format!(
            "CREATE TABLE {table} (id INTEGER PRIMARY KEY, ssn TEXT, email TEXT)"
        ))
        .unwrap();
    for (id, ssn, email) in rows {
        let ssn = ssn.map(|v| encrypt_to_string(v, key, None).unwrap());
        let email = email.map(|v| encrypt_to_string(v, key, None).unwrap());
        backend
            .with_connection(|c| {
                c.execute(
                    &format!("INSERT INTO {table} (id, ssn, email) VALUES (?1, ?2, ?3)"),
                    rusqlite::params![id, ssn, email],
                )
            })
            .unwrap();
    }
}

/// Raw stored cells of one row.
pub fn cells(backend: &SqliteBackend, table: &str, id: i64) -> (Option<String>, Option<String>) {
    backend
        .with_connection(|c| {
            c.query_row(
                &format!("SELECT ssn, email FROM {table} WHERE id = ?1"),
                [id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
        })
        .unwrap()
}
