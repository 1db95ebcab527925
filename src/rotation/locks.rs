use std::collections::HashSet;
use std::sync::LazyLock;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Tables being rotated anywhere in this process, keyed by store and table
/// so separate coordinators over one database exclude each other.
static TABLE_LOCKS: LazyLock<TableLocks> = LazyLock::new(TableLocks::default);

pub(crate) fn table_locks() -> &'static TableLocks {
    &TABLE_LOCKS
}

#[derive(Debug, Default)]
pub(crate) struct TableLocks {
    held: Mutex<HashSet<(String, String)>>,
}

impl TableLocks {
    pub(crate) fn try_acquire(&self, store: &str, table: &str) -> Result<TableGuard<'_>> {
        let key = (store.to_string(), table.to_string());
        if !self.held.lock().insert(key.clone()) {
            return Err(Error::TableLocked(table.to_string()));
        }
        debug!(store = %store, table = %table, "table rotation lock acquired");
        Ok(TableGuard { locks: self, key })
    }

    pub(crate) fn is_locked(&self, store: &str, table: &str) -> bool {
        self.held
            .lock()
            .contains(&(store.to_string(), table.to_string()))
    }
}

pub(crate) struct TableGuard<'a> {
    locks: &'a TableLocks,
    key: (String, String),
}

impl Drop for TableGuard<'_> {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.key);
    }
}
