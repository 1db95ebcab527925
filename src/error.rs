use keyward_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(String),

    #[error("Store operation timed out: {0}")]
    Timeout(String),

    #[error("Constraint violated: {0}")]
    Conflict(String),

    #[error("Corrupt stored data: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication failed: ciphertext, key or associated data do not match")]
    AuthenticationFailed,

    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Table \"{0}\" is already being rotated by another job")]
    TableLocked(String),

    #[error("Rotation job failed: {0}")]
    JobFailure(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Secret \"{0}\" was rotated concurrently")]
    RotationConflict(String),

    #[error("Audit chain head kept moving after {attempts} append attempts")]
    AppendContention { attempts: u32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<CryptoError> for Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailed => Error::AuthenticationFailed,
            CryptoError::InvalidKeyLength { .. }
            | CryptoError::InvalidKeyEncoding(_)
            | CryptoError::InvalidSaltLength { .. } => Error::Validation(err.to_string()),
            other => Error::Crypto(other),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StorageError::Timeout(err.to_string())
            }
            Some(ErrorCode::ConstraintViolation) => StorageError::Conflict(err.to_string()),
            _ => StorageError::Sqlite(err.to_string()),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.into())
    }
}

impl Error {
    /// Short machine-readable kind, recorded on row errors and audit rows.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::AuthenticationFailed => "authentication_failed",
            Error::Crypto(_) => "crypto",
            Error::Storage(StorageError::Timeout(_)) => "timeout",
            Error::Storage(StorageError::Conflict(_)) => "conflict",
            Error::Storage(_) => "storage",
            Error::TableLocked(_) => "table_locked",
            Error::JobFailure(_) => "job_failure",
            Error::NotFound { .. } => "not_found",
            Error::RotationConflict(_) => "rotation_conflict",
            Error::AppendContention { .. } => "append_contention",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
