//! Versioned application secrets with grace-period overlap.

mod scheduler;
mod store;
mod types;

pub use scheduler::{SchedulerCycleReport, SchedulerHandle, SecretFailure, SecretRotationScheduler};
pub use store::{SecretVersionStore, SignedWith};
pub use types::{
    AuditStatus, DueSecret, RotationAuditRecord, SecretDefinition, SecretRotationCommit,
    SecretState, SecretVersion,
};
