use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Static rotation policy for one named secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub rotation_interval_days: i64,
    pub grace_period_days: i64,
    pub max_versions_kept: u32,
}

impl SecretDefinition {
    pub fn new(name: impl Into<String>, interval_days: i64, grace_days: i64, max_versions: u32) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            rotation_interval_days: interval_days,
            grace_period_days: grace_days,
            max_versions_kept: max_versions,
        }
    }

    fn named(name: &str, display: &str, interval_days: i64, grace_days: i64, max_versions: u32) -> Self {
        Self {
            display_name: Some(display.to_string()),
            ..Self::new(name, interval_days, grace_days, max_versions)
        }
    }

    /// Built-in policies for the secrets every deployment carries.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::named("JWT_SECRET", "JWT signing secret", 90, 30, 3),
            Self::named("JWT_REFRESH_SECRET", "JWT refresh token secret", 180, 30, 2),
            Self::named("ENCRYPTION_KEY", "Data encryption key", 365, 60, 2),
            Self::named("API_KEY_INTERNAL", "Internal API key", 180, 14, 2),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("secret name is empty".into()));
        }
        if self.rotation_interval_days <= 0 {
            return Err(Error::Config(format!(
                "{}: rotation_interval_days must be positive",
                self.name
            )));
        }
        if self.grace_period_days < 0 {
            return Err(Error::Config(format!(
                "{}: grace_period_days must not be negative",
                self.name
            )));
        }
        if self.max_versions_kept == 0 {
            return Err(Error::Config(format!(
                "{}: max_versions_kept must be at least 1",
                self.name
            )));
        }
        Ok(())
    }
}

/// One stored version. `value_protected` is the encoded AES-GCM blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretVersion {
    pub secret_name: String,
    pub version: u32,
    #[serde(skip_serializing)]
    pub value_protected: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_valid_for_verification: bool,
}

/// A row of `secrets_rotation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretState {
    pub id: i64,
    pub secret_name: String,
    pub active_version: Option<u32>,
    pub latest_version: u32,
    pub last_rotation: Option<DateTime<Utc>>,
    pub next_rotation: Option<DateTime<Utc>>,
}

/// Everything one rotation writes, committed atomically by the store.
#[derive(Debug, Clone)]
pub struct SecretRotationCommit<'a> {
    pub secret_name: &'a str,
    /// Active version observed before the rotation; the claim fails if it moved.
    pub expected_active: Option<u32>,
    pub new_version: u32,
    pub value_protected: &'a str,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// New `expires_at` for the demoted version.
    pub demoted_expires_at: DateTime<Utc>,
    pub next_rotation: DateTime<Utc>,
    pub max_versions_kept: u32,
    pub triggered_by: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(AuditStatus::Success),
            "FAILED" => Some(AuditStatus::Failed),
            _ => None,
        }
    }
}

/// A row of `rotation_audit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationAuditRecord {
    pub id: Option<i64>,
    pub secret_name: String,
    pub action: String,
    pub old_version: Option<u32>,
    pub new_version: Option<u32>,
    pub triggered_by: String,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A secret the scheduler should rotate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueSecret {
    pub name: String,
    /// `None` for a secret that has never been rotated.
    pub next_rotation: Option<DateTime<Utc>>,
    /// Active version when the secret was listed; the scheduler rotates
    /// only on top of this head.
    pub active_version: Option<u32>,
}
