use std::collections::HashMap;
use std::sync::Arc;

use keyward::config::RotationConfig;
use keyward::crypto::{decrypt_from_string, CryptoError, SymmetricKey};
use keyward::rotation::{
    EncryptedColumnSpec, JobStatus, KeyResolver, RotationOptions, RotationSchedule, RotationType,
};
use keyward::{Error, KeyRotationCoordinator, SqliteBackend, SystemClock};

use super::{backend, cells, key_a, key_b, seed_table};

// ============================================================================
// Helpers
// ============================================================================

fn users() -> EncryptedColumnSpec {
    EncryptedColumnSpec::new("users", ["ssn", "email"])
}

fn coordinator(backend: &Arc<SqliteBackend>, tables: Vec<EncryptedColumnSpec>) -> KeyRotationCoordinator {
    KeyRotationCoordinator::new(
        backend.clone(),
        backend.clone(),
        Arc::new(SystemClock),
        RotationConfig {
            batch_size: 2,
            tables,
        },
    )
}

fn decrypts(value: &Option<String>, key: &SymmetricKey) -> Option<String> {
    value
        .as_deref()
        .map(|v| decrypt_from_string(v, key, None).unwrap().to_string())
}

struct MapResolver(HashMap<String, SymmetricKey>);

impl MapResolver {
    fn of(keys: &[SymmetricKey]) -> Self {
        Self(keys.iter().map(|k| (k.fingerprint(), k.clone())).collect())
    }
}

impl KeyResolver for MapResolver {
    fn resolve(&self, fingerprint: &str) -> keyward::Result<Option<SymmetricKey>> {
        Ok(self.0.get(fingerprint).cloned())
    }
}

// ============================================================================
// Single table
// ============================================================================

#[test]
fn rotates_all_cells_to_new_key() {
    let backend = backend();
    seed_table(
        &backend,
        "users",
        &key_a(),
        &[
            (1, Some("111-11-1111"), Some("a@example.com")),
            (2, Some("222-22-2222"), None),
            (3, Some("333-33-3333"), Some("c@example.com")),
        ],
    );
    let coord = coordinator(&backend, vec![users()]);

    let result = coord
        .rotate_table(&users(), &key_a(), &key_b(), &RotationOptions::default())
        .unwrap();

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!((result.total, result.successful, result.failed), (3, 3, 0));

    let (ssn, email) = cells(&backend, "users", 1);
    assert_eq!(decrypts(&ssn, &key_b()).as_deref(), Some("111-11-1111"));
    assert_eq!(decrypts(&email, &key_b()).as_deref(), Some("a@example.com"));
    assert!(matches!(
        decrypt_from_string(ssn.as_deref().unwrap(), &key_a(), None),
        Err(CryptoError::AuthenticationFailed)
    ));

    let (ssn, email) = cells(&backend, "users", 2);
    assert_eq!(decrypts(&ssn, &key_b()).as_deref(), Some("222-22-2222"));
    assert!(email.is_none());
}

#[test]
fn every_non_null_cell_is_rewritten() {
    let backend = backend();
    let rows = [
        (1, Some("111-11-1111"), Some("a@example.com")),
        (2, Some("222-22-2222"), Some("b@example.com")),
        (3, Some("333-33-3333"), Some("c@example.com")),
    ];
    seed_table(&backend, "users", &key_a(), &rows);
    let before: Vec<_> = rows.iter().map(|(id, _, _)| cells(&backend, "users", *id)).collect();
    let coord = coordinator(&backend, vec![users()]);

    let result = coord
        .rotate_table(&users(), &key_a(), &key_b(), &RotationOptions::default())
        .unwrap();
    assert_eq!((result.total, result.successful, result.failed), (3, 3, 0));

    for ((id, ssn, email), (old_ssn, old_email)) in rows.iter().zip(before) {
        let (new_ssn, new_email) = cells(&backend, "users", *id);
        assert_ne!(new_ssn, old_ssn, "ssn of row {} unchanged", id);
        assert_ne!(new_email, old_email, "email of row {} unchanged", id);
        assert_eq!(decrypts(&new_ssn, &key_b()).as_deref(), *ssn);
        assert_eq!(decrypts(&new_email, &key_b()).as_deref(), *email);
    }
}

#[test]
fn foreign_key_row_is_reported_and_others_rotate() {
    let backend = backend();
    seed_table(
        &backend,
        "users",
        &key_a(),
        &[(1, Some("one"), None), (3, Some("three"), None)],
    );
    let stranger = SymmetricKey::from_bytes(&[7u8; 32]).unwrap();
    let foreign = keyward::crypto::encrypt_to_string("two", &stranger, None).unwrap();
    backend
        .with_connection(|c| {
            c.execute(
                "INSERT INTO users (id, ssn, email) VALUES (2, ?1, NULL)",
                [&foreign],
            )
        })
        .unwrap();

    let coord = coordinator(&backend, vec![users()]);
    let result = coord
        .rotate_table(&users(), &key_a(), &key_b(), &RotationOptions::default())
        .unwrap();

    assert_eq!(result.status, JobStatus::PartialFailure);
    assert_eq!((result.total, result.successful, result.failed), (3, 2, 1));
    assert_eq!(result.errors[0].row_id, 2);
    assert_eq!(result.errors[0].kind, "authentication_failed");

    assert_eq!(cells(&backend, "users", 2).0.as_deref(), Some(foreign.as_str()));
    assert_eq!(decrypts(&cells(&backend, "users", 3).0, &key_b()).as_deref(), Some("three"));
}

#[test]
fn dry_run_leaves_rows_untouched() {
    let backend = backend();
    seed_table(&backend, "users", &key_a(), &[(1, Some("x"), Some("y")), (2, None, Some("z"))]);
    let before = (cells(&backend, "users", 1), cells(&backend, "users", 2));
    let coord = coordinator(&backend, vec![users()]);

    let result = coord
        .rotate_table(&users(), &key_a(), &key_b(), &RotationOptions {
            dry_run: true,
            ..Default::default()
        })
        .unwrap();

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.successful, 2);
    assert_eq!((cells(&backend, "users", 1), cells(&backend, "users", 2)), before);
}

#[test]
fn dry_run_predicts_the_real_run() {
    let backend = backend();
    seed_table(
        &backend,
        "users",
        &key_a(),
        &[(1, Some("a"), Some("a@x")), (2, Some("b"), None), (3, None, Some("c@x")), (4, Some("d"), None)],
    );
    backend
        .execute_batch("UPDATE users SET email = 'not base64!' WHERE id = 3")
        .unwrap();
    let coord = coordinator(&backend, vec![users()]);

    let dry = coord
        .rotate_table(&users(), &key_a(), &key_b(), &RotationOptions {
            dry_run: true,
            ..Default::default()
        })
        .unwrap();
    let real = coord
        .rotate_table(&users(), &key_a(), &key_b(), &RotationOptions::default())
        .unwrap();

    assert_eq!((dry.total, dry.successful, dry.failed), (4, 3, 1));
    assert_eq!(
        (dry.status, dry.total, dry.successful, dry.failed, dry.skipped),
        (real.status, real.total, real.successful, real.failed, real.skipped)
    );
    assert_eq!(dry.status, JobStatus::PartialFailure);
    let failed_rows = |r: &keyward::rotation::RotationResult| r.errors.iter().map(|e| e.row_id).collect::<Vec<_>>();
    assert_eq!(failed_rows(&dry), failed_rows(&real));
    assert_eq!(failed_rows(&real), [3]);
}

// ============================================================================
// Jobs
// ============================================================================

#[test]
fn rerun_skips_migrated_rows() {
    let backend = backend();
    seed_table(&backend, "users", &key_a(), &[(1, Some("a"), None), (2, Some("b"), None), (3, Some("c"), None)]);
    let coord = coordinator(&backend, vec![users()]);

    let first = coord.rotate_all_keys(&key_a(), &key_b(), &RotationOptions::default()).unwrap();
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(first.total_successful, 3);

    // A row written under the old key after the first pass.
    let late = keyward::crypto::encrypt_to_string("d", &key_a(), None).unwrap();
    backend
        .with_connection(|c| c.execute("INSERT INTO users (id, ssn) VALUES (4, ?1)", [&late]))
        .unwrap();

    let second = coord.rotate_all_keys(&key_a(), &key_b(), &RotationOptions::default()).unwrap();
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!((second.total_successful, second.total_skipped), (1, 3));
    for (id, expected) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
        assert_eq!(decrypts(&cells(&backend, "users", id).0, &key_b()).as_deref(), Some(expected));
    }

    let history = coord.rotation_history(10).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.status == JobStatus::Completed && r.result.is_some()));

    assert_eq!(
        coord
            .purge_progress_markers(&key_a().fingerprint(), &key_b().fingerprint())
            .unwrap(),
        4
    );
}

#[test]
fn rotating_back_and_forth_rewrites_each_time() {
    let backend = backend();
    seed_table(&backend, "users", &key_a(), &[(1, Some("a"), None), (2, Some("b"), Some("b@x")), (3, Some("c"), None)]);
    let coord = coordinator(&backend, vec![users()]);
    let opts = RotationOptions::default();

    for (old, new) in [(key_a(), key_b()), (key_b(), key_a()), (key_a(), key_b())] {
        let run = coord.rotate_all_keys(&old, &new, &opts).unwrap();
        assert_eq!(run.status, JobStatus::Completed);
        assert_eq!((run.total_successful, run.total_skipped), (3, 0));
    }

    for (id, expected) in [(1, "a"), (2, "b"), (3, "c")] {
        assert_eq!(decrypts(&cells(&backend, "users", id).0, &key_b()).as_deref(), Some(expected));
    }
    assert_eq!(decrypts(&cells(&backend, "users", 2).1, &key_b()).as_deref(), Some("b@x"));

    // Each row keeps only the marker of its latest rewrite.
    assert_eq!(coord.purge_progress_markers(&key_b().fingerprint(), &key_a().fingerprint()).unwrap(), 0);
    assert_eq!(coord.purge_progress_markers(&key_a().fingerprint(), &key_b().fingerprint()).unwrap(), 3);
}

#[test]
fn atomic_job_rolls_back_every_table() {
    let backend = backend();
    seed_table(&backend, "users", &key_a(), &[(1, Some("u1"), None), (2, Some("u2"), None)]);
    seed_table(&backend, "accounts", &key_a(), &[(1, Some("acc"), None)]);
    backend
        .execute_batch("UPDATE accounts SET email = 'garbage' WHERE id = 1")
        .unwrap();
    let accounts = EncryptedColumnSpec::new("accounts", ["ssn", "email"]);
    let coord = coordinator(&backend, vec![users(), accounts]);

    let result = coord
        .rotate_all_keys(&key_a(), &key_b(), &RotationOptions {
            atomic: true,
            ..Default::default()
        })
        .unwrap();

    assert_eq!(result.status, JobStatus::Failed);
    assert!(result.rolled_back);
    assert_eq!(decrypts(&cells(&backend, "users", 1).0, &key_a()).as_deref(), Some("u1"));
    assert_eq!(decrypts(&cells(&backend, "accounts", 1).0, &key_a()).as_deref(), Some("acc"));
    assert!(!coord.is_table_locked("users"));

    let record = &coord.rotation_history(1).unwrap()[0];
    assert_eq!(record.status, JobStatus::Failed);
}

#[test]
fn parallel_job_rotates_each_table() {
    let backend = backend();
    let rows: Vec<(i64, Option<&str>, Option<&str>)> = (1..=20).map(|i| (i, Some("v"), Some("w"))).collect();
    seed_table(&backend, "users", &key_a(), &rows);
    seed_table(&backend, "accounts", &key_a(), &rows);
    let coord = coordinator(&backend, vec![users(), EncryptedColumnSpec::new("accounts", ["ssn", "email"])]);

    let result = coord
        .rotate_all_keys(&key_a(), &key_b(), &RotationOptions {
            parallel: true,
            created_by: Some("ops".into()),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.tables.len(), 2);
    assert_eq!(result.total_successful, 40);
    assert_eq!(decrypts(&cells(&backend, "accounts", 20).1, &key_b()).as_deref(), Some("w"));
}

#[test]
fn missing_table_fails_only_that_table() {
    let backend = backend();
    seed_table(&backend, "users", &key_a(), &[(1, Some("a"), None)]);
    let coord = coordinator(&backend, vec![users(), EncryptedColumnSpec::new("ghosts", ["secret"])]);

    let result = coord.rotate_all_keys(&key_a(), &key_b(), &RotationOptions::default()).unwrap();

    assert_eq!(result.status, JobStatus::PartialFailure);
    assert_eq!(result.tables[0].status, JobStatus::Completed);
    assert_eq!(result.tables[1].status, JobStatus::Failed);
    assert!(result.tables[1].error.is_some());
}

#[test]
fn invalid_job_input_has_no_side_effects() {
    let backend = backend();
    let coord = coordinator(&backend, Vec::new());
    assert!(matches!(
        coord.rotate_all_keys(&key_a(), &key_b(), &RotationOptions::default()),
        Err(Error::Validation(_))
    ));
    let coord = coordinator(&backend, vec![users()]);
    assert!(matches!(
        coord.rotate_all_keys(&key_a(), &key_a(), &RotationOptions::default()),
        Err(Error::Validation(_))
    ));
    assert!(coord.rotation_history(10).unwrap().is_empty());
}

// ============================================================================
// Scheduling
// ============================================================================

#[test]
fn scheduled_rotation_runs_when_due() {
    let backend = backend();
    seed_table(&backend, "users", &key_a(), &[(1, Some("a"), Some("b"))]);
    let coord = coordinator(&backend, vec![users()]);

    let scheduled = coord
        .schedule_key_rotation(RotationSchedule {
            old_key_fingerprint: key_a().fingerprint(),
            new_key_fingerprint: key_b().fingerprint(),
            rotation_type: RotationType::Scheduled,
            scheduled_at: None,
            created_by: Some("cron".into()),
        })
        .unwrap();
    assert_eq!(scheduled.status, JobStatus::Pending);
    assert_eq!(coord.due_rotations().unwrap().len(), 1);

    let outcomes = coord
        .run_due_rotations(&MapResolver::of(&[key_a(), key_b()]), &RotationOptions::default())
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].job_id, scheduled.job_id);
    let result = outcomes[0].outcome.as_ref().unwrap();
    assert_eq!(result.status, JobStatus::Completed);

    assert!(coord.due_rotations().unwrap().is_empty());
    assert_eq!(decrypts(&cells(&backend, "users", 1).1, &key_b()).as_deref(), Some("b"));

    // Already ran; a second attempt is refused.
    assert!(matches!(
        coord.run_scheduled_rotation(&scheduled.job_id, &MapResolver::of(&[]), &RotationOptions::default()),
        Err(Error::Validation(_))
    ));
}

#[test]
fn unresolvable_key_fails_the_schedule() {
    let backend = backend();
    seed_table(&backend, "users", &key_a(), &[(1, Some("a"), None)]);
    let coord = coordinator(&backend, vec![users()]);
    let scheduled = coord
        .schedule_key_rotation(RotationSchedule {
            old_key_fingerprint: key_a().fingerprint(),
            new_key_fingerprint: key_b().fingerprint(),
            rotation_type: RotationType::Emergency,
            scheduled_at: None,
            created_by: None,
        })
        .unwrap();

    let err = coord
        .run_scheduled_rotation(&scheduled.job_id, &MapResolver::of(&[key_a()]), &RotationOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::JobFailure(_)));

    let record = &coord.rotation_history(1).unwrap()[0];
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error.is_some());
    assert_eq!(decrypts(&cells(&backend, "users", 1).0, &key_a()).as_deref(), Some("a"));
}

#[test]
fn unknown_job_is_not_found() {
    let backend = backend();
    let coord = coordinator(&backend, vec![users()]);
    assert!(matches!(
        coord.run_scheduled_rotation("nope", &MapResolver::of(&[]), &RotationOptions::default()),
        Err(Error::NotFound { .. })
    ));
}
