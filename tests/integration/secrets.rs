use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use keyward::config::{AuditConfig, SecretsConfig};
use keyward::crypto::SymmetricKey;
use keyward::secrets::{
    AuditStatus, RotationAuditRecord, SecretDefinition, SecretRotationCommit, SecretState,
    SecretVersion,
};
use keyward::storage::SecretStore;
use keyward::{
    AuditChain, Error, ManualClock, SecretRotationScheduler, SecretVersionStore, SqliteBackend,
    SystemClock,
};

use super::backend;

fn master() -> SymmetricKey {
    SymmetricKey::from_bytes(&[9u8; 32]).unwrap()
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

#[test]
fn previous_version_verifies_during_grace_only() {
    let backend = backend();
    let clock = Arc::new(ManualClock::new(start()));
    let store = SecretVersionStore::new(
        backend.clone(),
        master(),
        vec![SecretDefinition::new("JWT_SECRET", 90, 30, 3)],
        clock.clone(),
    )
    .unwrap();

    store.rotate_secret("JWT_SECRET", "bootstrap").unwrap();
    let token = b"header.payload";
    let signed = store.sign_with_active("JWT_SECRET", token).unwrap();
    assert_eq!(signed.version, 1);

    clock.advance(Duration::days(90));
    let v2 = store.rotate_secret("JWT_SECRET", "ops").unwrap();
    assert_eq!(v2.version, 2);
    assert_eq!(store.get_verification_secrets("JWT_SECRET").unwrap().len(), 2);
    assert_eq!(store.verify_with_any("JWT_SECRET", token, &signed.mac).unwrap(), Some(1));

    clock.advance(Duration::days(29));
    assert_eq!(store.invalidate_expired_versions().unwrap(), 0);
    assert_eq!(store.verify_with_any("JWT_SECRET", token, &signed.mac).unwrap(), Some(1));

    clock.advance(Duration::days(2));
    // Past expiry the version stops verifying even before the sweep.
    assert_eq!(store.verify_with_any("JWT_SECRET", token, &signed.mac).unwrap(), None);
    assert_eq!(store.invalidate_expired_versions().unwrap(), 1);
    assert_eq!(store.invalidate_expired_versions().unwrap(), 0);

    let versions = store.versions("JWT_SECRET").unwrap();
    assert_eq!(versions.len(), 2);
    assert!(versions[0].is_active);
    assert!(!versions[1].is_valid_for_verification);
}

#[test]
fn old_versions_are_pruned() {
    let backend = backend();
    let clock = Arc::new(ManualClock::new(start()));
    let store = SecretVersionStore::new(
        backend.clone(),
        master(),
        vec![SecretDefinition::new("API_KEY_INTERNAL", 180, 14, 2)],
        clock.clone(),
    )
    .unwrap();

    for _ in 0..5 {
        store.rotate_secret("API_KEY_INTERNAL", "ops").unwrap();
        clock.advance(Duration::days(30));
        store.invalidate_expired_versions().unwrap();
    }

    let versions: Vec<u32> = store
        .versions("API_KEY_INTERNAL")
        .unwrap()
        .iter()
        .map(|v| v.version)
        .collect();
    assert!(versions.len() <= 2, "kept {:?}", versions);
    assert_eq!(versions[0], 5);
    let history = store.rotation_history("API_KEY_INTERNAL", 10).unwrap();
    assert_eq!(history.len(), 5);
    assert!(history.iter().all(|r| r.status == AuditStatus::Success));
}

#[test]
fn racing_rotations_never_duplicate_versions() {
    let backend = backend();
    let store = Arc::new(
        SecretVersionStore::new(
            backend.clone(),
            master(),
            vec![SecretDefinition::new("ENCRYPTION_KEY", 365, 60, 10)],
            Arc::new(SystemClock),
        )
        .unwrap(),
    );
    store.rotate_secret("ENCRYPTION_KEY", "bootstrap").unwrap();

    let barrier = Arc::new(Barrier::new(6));
    let handles: Vec<_> = (0..6)
        .map(|n| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                store.rotate_secret("ENCRYPTION_KEY", &format!("worker-{}", n))
            })
        })
        .collect();

    let mut won = Vec::new();
    for handle in handles {
        match handle.join().unwrap() {
            Ok(version) => won.push(version.version),
            Err(Error::RotationConflict(name)) => assert_eq!(name, "ENCRYPTION_KEY"),
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert!(!won.is_empty());

    let versions = store.versions("ENCRYPTION_KEY").unwrap();
    let mut numbers: Vec<u32> = versions.iter().map(|v| v.version).collect();
    numbers.dedup();
    assert_eq!(numbers.len(), versions.len());
    assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);
    assert_eq!(versions.len(), won.len() + 1);
}

#[test]
fn rotation_is_recorded_in_audit_chain() {
    let backend = backend();
    let chain = Arc::new(AuditChain::new(backend.clone(), Arc::new(SystemClock), &AuditConfig::default()));
    let store = SecretVersionStore::new(
        backend.clone(),
        master(),
        SecretDefinition::defaults(),
        Arc::new(SystemClock),
    )
    .unwrap()
    .with_audit_chain(chain.clone());

    store.rotate_secret("JWT_REFRESH_SECRET", "admin").unwrap();

    let entries = chain.entries_by_entity("secret", Some("JWT_REFRESH_SECRET"), 10).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "secret.rotated");
    assert_eq!(entries[0].actor_id.as_deref(), Some("admin"));
    assert!(chain.verify_chain_integrity(None, None).unwrap().is_intact());
}

#[test]
fn unknown_secret_is_not_found() {
    let store = SecretVersionStore::new(backend(), master(), SecretDefinition::defaults(), Arc::new(SystemClock)).unwrap();
    assert!(matches!(
        store.rotate_secret("NOPE", "ops"),
        Err(Error::NotFound { .. })
    ));
    assert!(store.get_active_secret("JWT_SECRET").unwrap().is_none());
}

// ============================================================================
// Scheduler
// ============================================================================

/// Fails every commit for one secret name, delegating everything else.
struct RefusingStore {
    inner: Arc<SqliteBackend>,
    refuse: &'static str,
}

impl SecretStore for RefusingStore {
    fn secret_state(&self, name: &str) -> keyward::Result<Option<SecretState>> {
        self.inner.secret_state(name)
    }

    fn secret_states(&self) -> keyward::Result<Vec<SecretState>> {
        self.inner.secret_states()
    }

    fn commit_rotation(&self, commit: &SecretRotationCommit<'_>) -> keyward::Result<u64> {
        if commit.secret_name == self.refuse {
            return Err(Error::Storage(keyward::StorageError::Timeout("simulated".into())));
        }
        self.inner.commit_rotation(commit)
    }

    fn active_version(&self, name: &str) -> keyward::Result<Option<SecretVersion>> {
        self.inner.active_version(name)
    }

    fn verification_versions(&self, name: &str, now: DateTime<Utc>) -> keyward::Result<Vec<SecretVersion>> {
        self.inner.verification_versions(name, now)
    }

    fn versions(&self, name: &str) -> keyward::Result<Vec<SecretVersion>> {
        self.inner.versions(name)
    }

    fn invalidate_expired(&self, now: DateTime<Utc>) -> keyward::Result<u64> {
        self.inner.invalidate_expired(now)
    }

    fn record_rotation_audit(&self, record: &RotationAuditRecord) -> keyward::Result<()> {
        self.inner.record_rotation_audit(record)
    }

    fn rotation_audit(&self, name: &str, limit: usize) -> keyward::Result<Vec<RotationAuditRecord>> {
        self.inner.rotation_audit(name, limit)
    }
}

#[test]
fn scheduler_cycle_continues_past_failures() {
    let backend = backend();
    let store = Arc::new(
        SecretVersionStore::new(
            Arc::new(RefusingStore {
                inner: backend.clone(),
                refuse: "JWT_SECRET",
            }),
            master(),
            SecretDefinition::defaults(),
            Arc::new(SystemClock),
        )
        .unwrap(),
    );
    let scheduler = SecretRotationScheduler::new(store.clone(), &SecretsConfig::default());

    let report = scheduler.run_once();
    assert_eq!(report.due, 4);
    assert_eq!(report.rotated.len(), 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "JWT_SECRET");
    assert!(report.error.is_none());

    let failed = store.rotation_history("JWT_SECRET", 5).unwrap();
    assert_eq!(failed[0].status, AuditStatus::Failed);
    assert!(failed[0].error_message.is_some());

    // Rotated secrets are not due again; the failed one is retried.
    let report = scheduler.run_once();
    assert_eq!(report.due, 1);
    assert_eq!(report.failures.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawned_scheduler_rotates_and_stops() {
    let backend = backend();
    let store = Arc::new(
        SecretVersionStore::new(backend.clone(), master(), SecretDefinition::defaults(), Arc::new(SystemClock))
            .unwrap(),
    );
    let handle = SecretRotationScheduler::new(store.clone(), &SecretsConfig::default())
        .with_interval(StdDuration::from_millis(50))
        .spawn();

    for _ in 0..100 {
        if store.get_active_secret("JWT_SECRET").unwrap().is_some() {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    handle.shutdown().await;

    for def in SecretDefinition::defaults() {
        let versions = store.versions(&def.name).unwrap();
        assert_eq!(versions.len(), 1, "{} rotated more than once", def.name);
        assert_eq!(store.get_active_secret(&def.name).unwrap().unwrap().len(), 128);
    }
}
