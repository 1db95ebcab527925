use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SubsecRound, Utc};
use keyward_crypto::{canonical_json, hash};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::types::{
    AuditDigest, AuditEntry, AuditStats, Divergence, IntegrityReport, NewAuditEntry,
    PendingAuditEntry, GENESIS_HASH,
};
use crate::clock::Clock;
use crate::config::AuditConfig;
use crate::error::{Error, Result};
use crate::storage::{format_ts, AuditStore};

const ENTRY_DOMAIN: &str = "keyward:audit:v1";
const DIGEST_DOMAIN: &str = "keyward:audit-digest:v1";

/// `curr_hash` of an entry: SHA-256 over the NUL-separated fields, hex.
/// Absent actor or entity id hash as the empty string. Text fields never
/// contain NUL (`append` rejects it) and the payload is canonical JSON, so
/// the separators are unambiguous.
pub fn compute_entry_hash(
    prev_hash: &str,
    actor_id: Option<&str>,
    action: &str,
    entity: &str,
    entity_id: Option<&str>,
    payload_json: &str,
    ts: &DateTime<Utc>,
) -> String {
    let ts = format_ts(ts);
    let fields = [
        ENTRY_DOMAIN,
        prev_hash,
        actor_id.unwrap_or(""),
        action,
        entity,
        entity_id.unwrap_or(""),
        payload_json,
        &ts,
    ];
    hash(&fields.join("\0"))
}

/// Hash over an ordered list of entry hashes.
pub fn digest_hash<'a>(hashes: impl IntoIterator<Item = &'a str>) -> String {
    let mut message = String::from(DIGEST_DOMAIN);
    for h in hashes {
        message.push('\0');
        message.push_str(h);
    }
    hash(&message)
}

struct CachedHead {
    hash: String,
    fetched: Instant,
}

/// One logical audit chain over an [`AuditStore`].
///
/// Appends are serialized by a per-chain mutex and committed with a
/// conditional insert against the store's head, so several chains (or
/// processes) sharing one store still produce a single linear chain.
pub struct AuditChain {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    append_lock: Mutex<()>,
    head_cache: Mutex<Option<CachedHead>>,
    cache_ttl: Duration,
    append_retries: u32,
}

impl AuditChain {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>, config: &AuditConfig) -> Self {
        Self {
            store,
            clock,
            append_lock: Mutex::new(()),
            head_cache: Mutex::new(None),
            cache_ttl: Duration::from_millis(config.head_cache_ttl_ms),
            append_retries: config.append_retries.max(1),
        }
    }

    pub fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        if entry.action.trim().is_empty() {
            return Err(Error::Validation("audit action is empty".into()));
        }
        if entry.entity.trim().is_empty() {
            return Err(Error::Validation("audit entity is empty".into()));
        }
        let text_fields = [
            ("actor", entry.actor_id.as_deref()),
            ("action", Some(entry.action.as_str())),
            ("entity", Some(entry.entity.as_str())),
            ("entity id", entry.entity_id.as_deref()),
        ];
        for (field, value) in text_fields {
            if value.is_some_and(|v| v.contains('\0')) {
                return Err(Error::Validation(format!("audit {} contains a NUL character", field)));
            }
        }
        let payload_json = canonical_json(&entry.payload)?;

        let _guard = self.append_lock.lock();
        for attempt in 1..=self.append_retries {
            // The write path always reads the head from the store, never the cache.
            let prev_hash = self
                .store
                .head()?
                .map(|(_, h)| h)
                .unwrap_or_else(|| GENESIS_HASH.to_string());
            let ts = self.clock.now().trunc_subsecs(6);
            let curr_hash = compute_entry_hash(
                &prev_hash,
                entry.actor_id.as_deref(),
                &entry.action,
                &entry.entity,
                entry.entity_id.as_deref(),
                &payload_json,
                &ts,
            );
            let pending = PendingAuditEntry {
                actor_id: entry.actor_id.clone(),
                action: entry.action.clone(),
                entity: entry.entity.clone(),
                entity_id: entry.entity_id.clone(),
                payload_json: payload_json.clone(),
                ts,
                prev_hash,
                curr_hash,
            };

            if let Some(id) = self.store.insert_if_head(&pending)? {
                *self.head_cache.lock() = Some(CachedHead {
                    hash: pending.curr_hash.clone(),
                    fetched: Instant::now(),
                });
                debug!(id, action = %pending.action, entity = %pending.entity, "audit entry appended");
                return Ok(AuditEntry {
                    id,
                    actor_id: pending.actor_id,
                    action: pending.action,
                    entity: pending.entity,
                    entity_id: pending.entity_id,
                    payload: entry.payload,
                    ts: pending.ts,
                    prev_hash: pending.prev_hash,
                    curr_hash: pending.curr_hash,
                });
            }

            warn!(attempt, "audit chain head moved during append, retrying");
            std::thread::sleep(Duration::from_millis(u64::from(attempt)));
        }

        Err(Error::AppendContention {
            attempts: self.append_retries,
        })
    }

    /// Head hash for readers. May lag other writers by up to the cache TTL.
    pub fn get_last_hash(&self) -> Result<String> {
        {
            let cache = self.head_cache.lock();
            if let Some(cached) = cache.as_ref() {
                if cached.fetched.elapsed() < self.cache_ttl {
                    return Ok(cached.hash.clone());
                }
            }
        }
        let hash = self
            .store
            .head()?
            .map(|(_, h)| h)
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        *self.head_cache.lock() = Some(CachedHead {
            hash: hash.clone(),
            fetched: Instant::now(),
        });
        Ok(hash)
    }

    /// Recompute every entry in `[start_id, end_id]` and check its link to
    /// the previous entry. Reports; never repairs.
    pub fn verify_chain_integrity(
        &self,
        start_id: Option<i64>,
        end_id: Option<i64>,
    ) -> Result<IntegrityReport> {
        let entries = self.store.entries(start_id, end_id)?;
        let mut report = IntegrityReport::default();
        let Some(first) = entries.first() else {
            return Ok(report);
        };

        let mut expected_prev = match self.store.entry_before(first.id)? {
            Some(prev) => prev.curr_hash,
            None => GENESIS_HASH.to_string(),
        };

        for entry in &entries {
            report.total += 1;
            let payload_json = canonical_json(&entry.payload)?;
            let expected_hash = compute_entry_hash(
                &entry.prev_hash,
                entry.actor_id.as_deref(),
                &entry.action,
                &entry.entity,
                entry.entity_id.as_deref(),
                &payload_json,
                &entry.ts,
            );
            let hash_mismatch = expected_hash != entry.curr_hash;
            let link_mismatch = expected_prev != entry.prev_hash;

            if hash_mismatch || link_mismatch {
                report.invalid += 1;
                report.first_divergence.get_or_insert(entry.id);
                report.divergences.push(Divergence {
                    id: entry.id,
                    expected_hash,
                    actual_hash: entry.curr_hash.clone(),
                    expected_prev: expected_prev.clone(),
                    actual_prev: entry.prev_hash.clone(),
                    hash_mismatch,
                    link_mismatch,
                });
            } else {
                report.valid += 1;
            }
            expected_prev = entry.curr_hash.clone();
        }

        if let Some(id) = report.first_divergence {
            warn!(first_divergence = id, invalid = report.invalid, "audit chain integrity violated");
        } else {
            info!(total = report.total, "audit chain verified");
        }
        Ok(report)
    }

    pub fn entries_by_actor(&self, actor_id: &str, limit: usize) -> Result<Vec<AuditEntry>> {
        self.store.entries_by_actor(actor_id, limit)
    }

    pub fn entries_by_entity(
        &self,
        entity: &str,
        entity_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>> {
        self.store.entries_by_entity(entity, entity_id, limit)
    }

    /// Entries in a time window, oldest first (for export).
    pub fn entries_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AuditEntry>> {
        if from > to {
            return Err(Error::Validation("range start is after range end".into()));
        }
        self.store.entries_between(from, to)
    }

    pub fn stats(&self, since: Option<DateTime<Utc>>) -> Result<AuditStats> {
        self.store.stats(since, 10)
    }

    /// Record a checkpoint over `[period_start, period_end]`.
    pub fn create_digest(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<AuditDigest> {
        let entries = self.entries_between(period_start, period_end)?;
        let mut digest = AuditDigest {
            id: None,
            period_start,
            period_end,
            entry_count: entries.len() as u64,
            first_entry_id: entries.first().map(|e| e.id),
            last_entry_id: entries.last().map(|e| e.id),
            head_hash: entries
                .last()
                .map(|e| e.curr_hash.clone())
                .unwrap_or_else(|| GENESIS_HASH.to_string()),
            digest_hash: digest_hash(entries.iter().map(|e| e.curr_hash.as_str())),
            created_at: self.clock.now().trunc_subsecs(6),
        };
        digest.id = Some(self.store.insert_digest(&digest)?);
        info!(
            entries = digest.entry_count,
            digest = %digest.digest_hash,
            "audit digest created"
        );
        Ok(digest)
    }

    /// True when the window still holds exactly the digested entries and
    /// they are internally consistent.
    pub fn verify_digest(&self, digest: &AuditDigest) -> Result<bool> {
        let entries = self.entries_between(digest.period_start, digest.period_end)?;
        let recomputed = digest_hash(entries.iter().map(|e| e.curr_hash.as_str()));
        if recomputed != digest.digest_hash
            || entries.len() as u64 != digest.entry_count
            || entries.first().map(|e| e.id) != digest.first_entry_id
            || entries.last().map(|e| e.id) != digest.last_entry_id
        {
            return Ok(false);
        }
        match (digest.first_entry_id, digest.last_entry_id) {
            (Some(first), Some(last)) => Ok(self
                .verify_chain_integrity(Some(first), Some(last))?
                .is_intact()),
            _ => Ok(true),
        }
    }

    pub fn digests(&self) -> Result<Vec<AuditDigest>> {
        self.store.digests()
    }
}
