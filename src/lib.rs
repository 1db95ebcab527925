//! keyward: key lifecycle and integrity verification.
//!
//! - [`rotation`] re-encrypts designated table columns from one data key to
//!   another, in resumable batches.
//! - [`secrets`] keeps named application secrets as versioned material with
//!   active, grace-period and expired states.
//! - [`audit`] is an append-only, hash-linked log of administrative actions.
//!
//! Cryptographic primitives live in the `keyward-crypto` crate and are
//! re-exported as [`crypto`].

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod rotation;
pub mod secrets;
pub mod storage;

pub use keyward_crypto as crypto;

pub use audit::{AuditChain, AuditEntry, IntegrityReport, NewAuditEntry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::KeywardConfig;
pub use error::{Error, Result, StorageError};
pub use rotation::{KeyRotationCoordinator, RotationOptions, RotationResult};
pub use secrets::{SecretRotationScheduler, SecretVersionStore};
#[cfg(feature = "sqlite")]
pub use storage::sqlite::SqliteBackend;
