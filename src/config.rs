//! Runtime configuration, loaded from JSON.
//!
//! Every field has a default, so `{}` is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rotation::EncryptedColumnSpec;
use crate::secrets::SecretDefinition;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywardConfig {
    pub storage: StorageConfig,
    pub rotation: RotationConfig,
    pub audit: AuditConfig,
    pub secrets: SecretsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Upper bound on how long a store call waits for a lock.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub batch_size: usize,
    /// Tables rotated by `rotate_all_keys` when the caller names none.
    pub tables: Vec<EncryptedColumnSpec>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            tables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub head_cache_ttl_ms: u64,
    pub append_retries: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            head_cache_ttl_ms: 5_000,
            append_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub definitions: Vec<SecretDefinition>,
    pub lookahead_days: i64,
    pub scheduler_interval_minutes: u64,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            definitions: SecretDefinition::defaults(),
            lookahead_days: 7,
            scheduler_interval_minutes: 1_440,
        }
    }
}

impl KeywardConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rotation.batch_size == 0 {
            return Err(Error::Config("rotation.batch_size must be positive".into()));
        }
        if self.audit.append_retries == 0 {
            return Err(Error::Config("audit.append_retries must be positive".into()));
        }
        if self.secrets.scheduler_interval_minutes == 0 {
            return Err(Error::Config(
                "secrets.scheduler_interval_minutes must be positive".into(),
            ));
        }
        if self.secrets.lookahead_days < 0 {
            return Err(Error::Config("secrets.lookahead_days must not be negative".into()));
        }
        for def in &self.secrets.definitions {
            def.validate()?;
        }
        let mut names: Vec<&str> = self.secrets.definitions.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(Error::Config(format!("secret \"{}\" defined twice", dup[0])));
        }
        for spec in &self.rotation.tables {
            spec.validate().map_err(|e| Error::Config(e.to_string()))?;
        }
        Ok(())
    }
}
