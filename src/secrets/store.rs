use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use keyward_crypto::{derive_subkey, generate_default_token, sign, verify, KeyCipher, SymmetricKey};
use serde_json::json;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use super::types::{
    AuditStatus, DueSecret, RotationAuditRecord, SecretDefinition, SecretRotationCommit,
    SecretVersion,
};
use crate::audit::{AuditChain, NewAuditEntry};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::storage::SecretStore;

const SUBKEY_SALT: &[u8] = b"keyward:secrets";

/// Which version produced a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedWith {
    pub version: u32,
    pub mac: String,
}

/// Named secrets stored as versions encrypted under a per-name sub-key of
/// the master key.
pub struct SecretVersionStore {
    store: Arc<dyn SecretStore>,
    master_key: SymmetricKey,
    definitions: BTreeMap<String, SecretDefinition>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<AuditChain>>,
}

impl SecretVersionStore {
    pub fn new(
        store: Arc<dyn SecretStore>,
        master_key: SymmetricKey,
        definitions: Vec<SecretDefinition>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        for def in definitions {
            def.validate()?;
            let name = def.name.clone();
            if by_name.insert(name.clone(), def).is_some() {
                return Err(Error::Config(format!("secret \"{}\" defined twice", name)));
            }
        }
        Ok(Self {
            store,
            master_key,
            definitions: by_name,
            clock,
            audit: None,
        })
    }

    /// Also append successful rotations to an audit chain.
    pub fn with_audit_chain(mut self, chain: Arc<AuditChain>) -> Self {
        self.audit = Some(chain);
        self
    }

    pub fn definition(&self, name: &str) -> Option<&SecretDefinition> {
        self.definitions.get(name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &SecretDefinition> {
        self.definitions.values()
    }

    /// Current time from the injected clock, at storage precision.
    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    fn cipher_for(&self, name: &str) -> Result<KeyCipher> {
        let info = format!("keyward:secret:v1:{}", name);
        let subkey = derive_subkey(&self.master_key, SUBKEY_SALT, info.as_bytes())?;
        Ok(KeyCipher::new(&subkey))
    }

    fn aad(name: &str, version: u32) -> String {
        format!("{}:{}", name, version)
    }

    fn reveal(&self, cipher: &KeyCipher, version: &SecretVersion) -> Result<Zeroizing<String>> {
        let aad = Self::aad(&version.secret_name, version.version);
        Ok(cipher.decrypt_str(&version.value_protected, Some(aad.as_bytes()))?)
    }

    fn definition_or_not_found(&self, name: &str) -> Result<&SecretDefinition> {
        self.definitions.get(name).ok_or_else(|| Error::NotFound {
            kind: "secret definition",
            id: name.to_string(),
        })
    }

    /// Create a new active version, demoting the current one into its grace period.
    pub fn rotate_secret(&self, name: &str, triggered_by: &str) -> Result<SecretVersion> {
        let def = self.definition_or_not_found(name)?;

        let old_version = match self.store.secret_state(name) {
            Ok(state) => state.and_then(|s| s.active_version),
            Err(e) => return Err(self.record_failure(name, None, triggered_by, e)),
        };

        match self.try_rotate(def, old_version, triggered_by) {
            Ok((version, pruned)) => Ok(self.rotated(name, old_version, triggered_by, version, pruned)),
            Err(e) => Err(self.record_failure(name, old_version, triggered_by, e)),
        }
    }

    /// Rotate only if the active version is still `expected_active`, the
    /// head observed when the secret was found due. `Ok(None)` means another
    /// rotation already moved the head; nothing is written.
    pub fn rotate_secret_if_unchanged(
        &self,
        name: &str,
        expected_active: Option<u32>,
        triggered_by: &str,
    ) -> Result<Option<SecretVersion>> {
        let def = self.definition_or_not_found(name)?;
        match self.try_rotate(def, expected_active, triggered_by) {
            Ok((version, pruned)) => Ok(Some(self.rotated(name, expected_active, triggered_by, version, pruned))),
            Err(Error::RotationConflict(_)) => {
                info!(
                    secret = %name,
                    expected_active = ?expected_active,
                    "secret already rotated elsewhere, skipping"
                );
                Ok(None)
            }
            Err(e) => Err(self.record_failure(name, expected_active, triggered_by, e)),
        }
    }

    fn rotated(
        &self,
        name: &str,
        old_version: Option<u32>,
        triggered_by: &str,
        version: SecretVersion,
        pruned: u64,
    ) -> SecretVersion {
        info!(
            secret = %name,
            version = version.version,
            old_version = ?old_version,
            pruned,
            triggered_by = %triggered_by,
            "secret rotated"
        );
        if let Some(chain) = &self.audit {
            let entry = NewAuditEntry::new("secret.rotated", "secret")
                .actor(triggered_by)
                .entity_id(name)
                .payload(json!({
                    "old_version": old_version,
                    "new_version": version.version,
                    "pruned": pruned,
                }));
            if let Err(e) = chain.append(entry) {
                warn!(secret = %name, error = %e, "failed to append rotation to audit chain");
            }
        }
        version
    }

    /// Commit a new version on top of `expected_active`. A head that moved
    /// since it was observed is a `RotationConflict`.
    fn try_rotate(
        &self,
        def: &SecretDefinition,
        expected_active: Option<u32>,
        triggered_by: &str,
    ) -> Result<(SecretVersion, u64)> {
        let name = def.name.as_str();
        let state = self.store.secret_state(name)?;
        if state.as_ref().and_then(|s| s.active_version) != expected_active {
            return Err(Error::RotationConflict(name.to_string()));
        }
        let new_version = state.as_ref().map_or(0, |s| s.latest_version) + 1;

        let now = self.now();
        let interval = Duration::days(def.rotation_interval_days);
        let grace = Duration::days(def.grace_period_days);
        let expires_at = now + interval + grace;

        let material = generate_default_token()?;
        let aad = Self::aad(name, new_version);
        let value_protected = self
            .cipher_for(name)?
            .encrypt_str(&material, Some(aad.as_bytes()))?;

        let pruned = self.store.commit_rotation(&SecretRotationCommit {
            secret_name: name,
            expected_active,
            new_version,
            value_protected: &value_protected,
            created_at: now,
            expires_at,
            demoted_expires_at: now + grace,
            next_rotation: now + interval,
            max_versions_kept: def.max_versions_kept,
            triggered_by,
        })?;

        Ok((
            SecretVersion {
                secret_name: name.to_string(),
                version: new_version,
                value_protected,
                created_at: now,
                expires_at: Some(expires_at),
                is_active: true,
                is_valid_for_verification: true,
            },
            pruned,
        ))
    }

    fn record_failure(&self, name: &str, old_version: Option<u32>, triggered_by: &str, err: Error) -> Error {
        error!(secret = %name, error = %err, "secret rotation failed");
        let record = RotationAuditRecord {
            id: None,
            secret_name: name.to_string(),
            action: "ROTATE".into(),
            old_version,
            new_version: None,
            triggered_by: triggered_by.to_string(),
            status: AuditStatus::Failed,
            error_message: Some(err.to_string()),
            created_at: self.now(),
        };
        if let Err(e) = self.store.record_rotation_audit(&record) {
            warn!(secret = %name, error = %e, "failed to record rotation failure");
        }
        err
    }

    /// Plaintext of the active version, for issuing new artifacts.
    pub fn get_active_secret(&self, name: &str) -> Result<Option<Zeroizing<String>>> {
        let Some(version) = self.store.active_version(name)? else {
            return Ok(None);
        };
        let cipher = self.cipher_for(name)?;
        self.reveal(&cipher, &version).map(Some)
    }

    /// Plaintexts accepted for verification, newest first.
    pub fn get_verification_secrets(&self, name: &str) -> Result<Vec<Zeroizing<String>>> {
        Ok(self
            .verification_versions(name)?
            .into_iter()
            .map(|(_, secret)| secret)
            .collect())
    }

    fn verification_versions(&self, name: &str) -> Result<Vec<(u32, Zeroizing<String>)>> {
        let versions = self.store.verification_versions(name, self.now())?;
        if versions.is_empty() {
            return Ok(Vec::new());
        }
        let cipher = self.cipher_for(name)?;
        versions
            .iter()
            .map(|v| Ok((v.version, self.reveal(&cipher, v)?)))
            .collect()
    }

    /// HMAC `data` with the active version.
    pub fn sign_with_active(&self, name: &str, data: &[u8]) -> Result<SignedWith> {
        let version = self.store.active_version(name)?.ok_or_else(|| Error::NotFound {
            kind: "active secret",
            id: name.to_string(),
        })?;
        let secret = self.reveal(&self.cipher_for(name)?, &version)?;
        Ok(SignedWith {
            version: version.version,
            mac: sign(data, secret.as_bytes()),
        })
    }

    /// Version whose secret verifies `mac`, if any.
    pub fn verify_with_any(&self, name: &str, data: &[u8], mac: &str) -> Result<Option<u32>> {
        Ok(self
            .verification_versions(name)?
            .into_iter()
            .find(|(_, secret)| verify(data, mac, secret.as_bytes()))
            .map(|(version, _)| version))
    }

    /// Mark superseded versions past `expires_at` invalid. Idempotent.
    pub fn invalidate_expired_versions(&self) -> Result<u64> {
        let count = self.store.invalidate_expired(self.now())?;
        if count > 0 {
            info!(count, "expired secret versions invalidated");
        }
        Ok(count)
    }

    /// Registered secrets never rotated, or due within `lookahead` (overdue included).
    pub fn secrets_needing_rotation(&self, lookahead: Duration) -> Result<Vec<DueSecret>> {
        let horizon = self.now() + lookahead;
        let states: BTreeMap<String, _> = self
            .store
            .secret_states()?
            .into_iter()
            .map(|s| (s.secret_name.clone(), s))
            .collect();

        Ok(self
            .definitions
            .keys()
            .filter_map(|name| match states.get(name) {
                Some(state) if state.active_version.is_some() => match state.next_rotation {
                    Some(next) if next > horizon => None,
                    next => Some(DueSecret {
                        name: name.clone(),
                        next_rotation: next,
                        active_version: state.active_version,
                    }),
                },
                _ => Some(DueSecret {
                    name: name.clone(),
                    next_rotation: None,
                    active_version: None,
                }),
            })
            .collect())
    }

    pub fn versions(&self, name: &str) -> Result<Vec<SecretVersion>> {
        self.store.versions(name)
    }

    /// Rotation audit trail, newest first.
    pub fn rotation_history(&self, name: &str, limit: usize) -> Result<Vec<RotationAuditRecord>> {
        self.store.rotation_audit(name, limit)
    }
}
