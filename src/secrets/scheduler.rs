//! Periodic secret rotation.
//!
//! Each cycle rotates every secret due within the lookahead window, then
//! sweeps expired versions. A failing secret is logged and retried on the
//! next cycle; it never stops the loop or the other secrets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::store::SecretVersionStore;
use crate::config::SecretsConfig;

const TRIGGER: &str = "scheduler";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerCycleReport {
    pub started_at: DateTime<Utc>,
    pub due: usize,
    /// (secret name, new version)
    pub rotated: Vec<(String, u32)>,
    /// Due secrets whose head moved before this cycle claimed them.
    pub already_rotated: Vec<String>,
    pub failures: Vec<SecretFailure>,
    pub invalidated: u64,
    /// Set when listing due secrets or the expiry sweep failed.
    pub error: Option<String>,
}

pub struct SecretRotationScheduler {
    secrets: Arc<SecretVersionStore>,
    interval: Duration,
    lookahead: chrono::Duration,
}

impl SecretRotationScheduler {
    pub fn new(secrets: Arc<SecretVersionStore>, config: &SecretsConfig) -> Self {
        Self {
            secrets,
            interval: Duration::from_secs(config.scheduler_interval_minutes.max(1) * 60),
            lookahead: chrono::Duration::days(config.lookahead_days),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One cycle. Blocking; call from a blocking context.
    pub fn run_once(&self) -> SchedulerCycleReport {
        let mut report = SchedulerCycleReport {
            started_at: self.secrets.now(),
            due: 0,
            rotated: Vec::new(),
            already_rotated: Vec::new(),
            failures: Vec::new(),
            invalidated: 0,
            error: None,
        };

        match self.secrets.secrets_needing_rotation(self.lookahead) {
            Ok(due) => {
                report.due = due.len();
                for secret in due {
                    match self
                        .secrets
                        .rotate_secret_if_unchanged(&secret.name, secret.active_version, TRIGGER)
                    {
                        Ok(Some(version)) => report.rotated.push((secret.name, version.version)),
                        Ok(None) => report.already_rotated.push(secret.name),
                        Err(e) => {
                            warn!(secret = %secret.name, error = %e, "scheduled rotation failed, will retry next cycle");
                            report.failures.push(SecretFailure {
                                name: secret.name,
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "failed to list secrets due for rotation");
                report.error = Some(e.to_string());
            }
        }

        match self.secrets.invalidate_expired_versions() {
            Ok(n) => report.invalidated = n,
            Err(e) => {
                error!(error = %e, "expired version sweep failed");
                report.error.get_or_insert_with(|| e.to_string());
            }
        }

        info!(
            due = report.due,
            rotated = report.rotated.len(),
            already_rotated = report.already_rotated.len(),
            failed = report.failures.len(),
            invalidated = report.invalidated,
            "secret rotation cycle finished"
        );
        report
    }

    /// Run cycles on the current tokio runtime until the handle is shut down.
    /// The first cycle starts immediately.
    pub fn spawn(self) -> SchedulerHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let scheduler = Arc::new(self);

        let task_shutdown = shutdown.clone();
        let task_notify = notify.clone();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = task_notify.notified() => {
                        debug!("secret scheduler shutdown signal received");
                        break;
                    }
                }
                if task_shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let cycle = scheduler.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || cycle.run_once()).await {
                    error!(error = %e, "secret rotation cycle panicked");
                }
            }
        });

        SchedulerHandle {
            shutdown,
            notify,
            join,
        }
    }
}

pub struct SchedulerHandle {
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop after the running cycle (if any) completes.
    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_one();
        if let Err(e) = self.join.await {
            error!(error = %e, "secret scheduler task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use chrono::TimeZone;
    use crate::secrets::SecretDefinition;
    use crate::storage::sqlite::SqliteBackend;
    use keyward_crypto::SymmetricKey;

    fn scheduler(defs: Vec<SecretDefinition>) -> (Arc<SecretVersionStore>, SecretRotationScheduler) {
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let secrets = Arc::new(
            SecretVersionStore::new(
                backend,
                SymmetricKey::generate().unwrap(),
                defs,
                Arc::new(SystemClock),
            )
            .unwrap(),
        );
        let scheduler = SecretRotationScheduler::new(secrets.clone(), &SecretsConfig::default());
        (secrets, scheduler)
    }

    #[test]
    fn first_cycle_rotates_everything_then_nothing() {
        let (secrets, scheduler) = scheduler(SecretDefinition::defaults());
        let first = scheduler.run_once();
        assert_eq!(first.due, 4);
        assert_eq!(first.rotated.len(), 4);
        assert!(first.failures.is_empty());
        assert!(secrets.get_active_secret("JWT_SECRET").unwrap().is_some());

        let second = scheduler.run_once();
        assert_eq!(second.due, 0);
        assert!(second.rotated.is_empty());
    }

    #[test]
    fn cycle_uses_the_store_clock() {
        let start = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();
        let secrets = Arc::new(
            SecretVersionStore::new(
                Arc::new(SqliteBackend::open_in_memory().unwrap()),
                SymmetricKey::generate().unwrap(),
                vec![SecretDefinition::new("S", 30, 7, 2)],
                Arc::new(ManualClock::new(start)),
            )
            .unwrap(),
        );
        let report = SecretRotationScheduler::new(secrets, &SecretsConfig::default()).run_once();
        assert_eq!(report.started_at, start);
        assert_eq!(report.rotated, [("S".to_string(), 1)]);
    }

    #[test]
    fn two_schedulers_rotate_a_due_secret_once() {
        let (secrets, first) = scheduler(vec![SecretDefinition::new("S", 30, 7, 2)]);
        let second = SecretRotationScheduler::new(secrets.clone(), &SecretsConfig::default());
        first.run_once();

        // Both list the secret as due on the same head, one claims it first.
        let due = secrets.secrets_needing_rotation(chrono::Duration::days(31)).unwrap();
        assert_eq!(due[0].active_version, Some(1));
        secrets
            .rotate_secret_if_unchanged("S", due[0].active_version, "scheduler")
            .unwrap()
            .unwrap();
        let stale = secrets
            .rotate_secret_if_unchanged("S", due[0].active_version, "scheduler")
            .unwrap();
        assert!(stale.is_none());
        assert_eq!(secrets.versions("S").unwrap().len(), 2);

        let report = second.run_once();
        assert_eq!(report.due, 0);
        assert!(report.already_rotated.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawned_loop_runs_and_shuts_down() {
        let (secrets, scheduler) = scheduler(vec![SecretDefinition::new("S", 30, 7, 2)]);
        let handle = scheduler.with_interval(Duration::from_millis(20)).spawn();
        for _ in 0..100 {
            if secrets.get_active_secret("S").unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;
        assert!(secrets.get_active_secret("S").unwrap().is_some());
        assert_eq!(secrets.versions("S").unwrap().len(), 1);
    }
}
