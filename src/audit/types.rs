use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `prev_hash` of the first entry in a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Caller-supplied content of an entry; hashes and timestamp are assigned on append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub actor_id: Option<String>,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl NewAuditEntry {
    pub fn new(action: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            actor_id: None,
            action: action.into(),
            entity: entity.into(),
            entity_id: None,
            payload: Value::Null,
        }
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// An entry as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor_id: Option<String>,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
    pub payload: Value,
    pub ts: DateTime<Utc>,
    pub prev_hash: String,
    pub curr_hash: String,
}

/// An entry ready to insert, not yet assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAuditEntry {
    pub actor_id: Option<String>,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
    /// Canonical JSON of the payload, exactly as hashed.
    pub payload_json: String,
    pub ts: DateTime<Utc>,
    pub prev_hash: String,
    pub curr_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub id: i64,
    pub expected_hash: String,
    pub actual_hash: String,
    pub expected_prev: String,
    pub actual_prev: String,
    pub hash_mismatch: bool,
    pub link_mismatch: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub total: u64,
    pub valid: u64,
    pub invalid: u64,
    pub divergences: Vec<Divergence>,
    pub first_divergence: Option<i64>,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.invalid == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCount {
    pub action: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_entries: u64,
    pub unique_actors: u64,
    pub unique_actions: u64,
    pub first_entry: Option<DateTime<Utc>>,
    pub last_entry: Option<DateTime<Utc>>,
    pub top_actions: Vec<ActionCount>,
}

/// Checkpoint over a time window of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditDigest {
    pub id: Option<i64>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub entry_count: u64,
    pub first_entry_id: Option<i64>,
    pub last_entry_id: Option<i64>,
    /// `curr_hash` of the last entry in the window, or the genesis hash.
    pub head_hash: String,
    /// SHA-256 over the window's ordered `curr_hash` values.
    pub digest_hash: String,
    pub created_at: DateTime<Utc>,
}
