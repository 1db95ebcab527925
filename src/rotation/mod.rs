//! Bulk re-encryption of encrypted columns from one data key to another.

mod coordinator;
mod locks;
mod types;

pub use coordinator::{KeyResolver, KeyRotationCoordinator, ScheduledRunOutcome};
pub use types::{
    is_identifier, AggregateRotationResult, CancellationFlag, EncryptedColumnSpec, JobStatus,
    RotationOptions, RotationRecord, RotationResult, RotationSchedule, RotationType, RowError,
    ScheduledRotation, ValidationReport,
};
