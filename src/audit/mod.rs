//! Append-only, hash-linked audit log.

mod chain;
mod types;

pub use chain::{compute_entry_hash, digest_hash, AuditChain};
pub use types::{
    ActionCount, AuditDigest, AuditEntry, AuditStats, Divergence, IntegrityReport, NewAuditEntry,
    PendingAuditEntry, GENESIS_HASH,
};
