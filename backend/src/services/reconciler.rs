//! Periodic availability reconciliation.
//!
//! [`Reconciler`] wakes on a fixed interval (60 s by default), reads "now"
//! from the injected [`Clock`] and asks the store to apply both availability
//! transitions in one transaction:
//!
//! 1. **expire**: schedules with `end_time < now` become unavailable;
//! 2. **resume after break**: schedules with `end_time > now` become available
//!    again when any break of the same user has `end_time < now`.
//!
//! A failed tick (store error or timeout) is logged and counted; the loop
//! carries on and tries again one interval later. There is no retry within a
//! tick and no backoff.
//!
//! # Usage
//!
//! ```rust,ignore
//! let handle = Reconciler::new(repository, clock, ReconcilerConfig::default()).spawn();
//! // ... serve requests ...
//! handle.shutdown().await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::db::repository::{FullRepository, ReconcileOutcome, RepositoryError};
use crate::models::Clock;

/// Interval between ticks when none is configured.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Upper bound on a single tick when none is configured.
pub const DEFAULT_TICK_TIMEOUT_SECS: u64 = 30;

/// Reconciler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Sleep between ticks.
    pub interval: Duration,
    /// Abandon a tick that takes longer than this. `None` waits forever.
    pub tick_timeout: Option<Duration>,
    /// Run one tick immediately instead of sleeping first.
    pub run_on_start: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            tick_timeout: Some(Duration::from_secs(DEFAULT_TICK_TIMEOUT_SECS)),
            run_on_start: false,
        }
    }
}

impl ReconcilerConfig {
    /// Read settings from the environment.
    ///
    /// - `RECONCILE_INTERVAL_SECS` (default 60, must be positive)
    /// - `RECONCILE_TIMEOUT_SECS` (default 30, `0` disables the timeout)
    /// - `RECONCILE_ON_START` (default false)
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("RECONCILE_INTERVAL_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| format!("RECONCILE_INTERVAL_SECS must be an integer, got '{}'", raw))?;
            if secs == 0 {
                return Err("RECONCILE_INTERVAL_SECS must be greater than zero".to_string());
            }
            config.interval = Duration::from_secs(secs);
        }

        if let Ok(raw) = std::env::var("RECONCILE_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| format!("RECONCILE_TIMEOUT_SECS must be an integer, got '{}'", raw))?;
            config.tick_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Ok(raw) = std::env::var("RECONCILE_ON_START") {
            config.run_on_start = matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }
}

/// What one successful tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// The instant both transitions were evaluated against.
    pub now: DateTime<Utc>,
    pub expired: usize,
    pub resumed: usize,
}

impl ReconcileReport {
    fn new(now: DateTime<Utc>, outcome: ReconcileOutcome) -> Self {
        Self {
            now,
            expired: outcome.expired,
            resumed: outcome.resumed,
        }
    }

    pub fn changed(&self) -> usize {
        self.expired + self.resumed
    }
}

/// Why a tick failed.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("reconciliation tick timed out after {0:?}")]
    Timeout(Duration),
}

/// Tick counters shared between the loop and its handle.
#[derive(Debug, Default)]
struct TickCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of the tick counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerStats {
    pub ticks_succeeded: u64,
    pub ticks_failed: u64,
}

impl TickCounters {
    fn snapshot(&self) -> ReconcilerStats {
        ReconcilerStats {
            ticks_succeeded: self.succeeded.load(Ordering::Relaxed),
            ticks_failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Keeps schedule availability flags in line with the clock.
#[derive(Clone)]
pub struct Reconciler {
    repository: Arc<dyn FullRepository>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
    counters: Arc<TickCounters>,
}

impl Reconciler {
    pub fn new(
        repository: Arc<dyn FullRepository>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            repository,
            clock,
            config,
            counters: Arc::new(TickCounters::default()),
        }
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.counters.snapshot()
    }

    /// Run one tick: read the clock once and apply both transitions.
    pub async fn tick(&self) -> Result<ReconcileReport, TickError> {
        let now = self.clock.now();
        let reconcile = self.repository.reconcile_availability(now);

        let outcome = match self.config.tick_timeout {
            Some(limit) => tokio::time::timeout(limit, reconcile)
                .await
                .map_err(|_| TickError::Timeout(limit))??,
            None => reconcile.await?,
        };

        Ok(ReconcileReport::new(now, outcome))
    }

    /// Run a tick and record its result. Never fails.
    async fn tick_and_log(&self) {
        match self.tick().await {
            Ok(report) => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                if report.changed() > 0 {
                    info!(
                        now = %report.now,
                        expired = report.expired,
                        resumed = report.resumed,
                        "availability reconciled"
                    );
                } else {
                    debug!(now = %report.now, "availability already consistent");
                }
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "error updating availability statuses");
            }
        }
    }

    /// Run until `cancel` fires. A tick already in progress is allowed to
    /// finish before the loop exits.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            timeout_secs = self.config.tick_timeout.map(|t| t.as_secs()),
            "availability reconciler started"
        );

        if self.config.run_on_start && !cancel.is_cancelled() {
            self.tick_and_log().await;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("availability reconciler stopped");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    self.tick_and_log().await;
                }
            }
        }
    }

    /// Start the loop on the current tokio runtime.
    pub fn spawn(self) -> ReconcilerHandle {
        let cancel = CancellationToken::new();
        let counters = Arc::clone(&self.counters);
        let task = tokio::spawn(self.run(cancel.clone()));
        ReconcilerHandle {
            cancel,
            task,
            counters,
        }
    }
}

/// Owner of a running reconciler task.
///
/// Dropping the handle leaves the task running; call [`shutdown`](Self::shutdown)
/// to stop it deterministically.
#[derive(Debug)]
pub struct ReconcilerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    counters: Arc<TickCounters>,
}

impl ReconcilerHandle {
    pub fn stats(&self) -> ReconcilerStats {
        self.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Token that stops the loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        self.task.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::LocalRepository;
    use crate::db::repository::{ScheduleRepository, UserRepository};
    use crate::models::{ManualClock, NewBreak, NewSchedule, NewUser, Role};
    use chrono::TimeZone;

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 6, 30, 0).unwrap()
    }

    fn fast_config() -> ReconcilerConfig {
        ReconcilerConfig {
            interval: Duration::from_secs(60),
            tick_timeout: None,
            run_on_start: false,
        }
    }

    #[tokio::test]
    async fn test_tick_reports_now_from_clock() {
        let repo = Arc::new(LocalRepository::new());
        let clock = Arc::new(ManualClock::new(t()));
        let reconciler = Reconciler::new(repo, clock, fast_config());

        let report = reconciler.tick().await.unwrap();
        assert_eq!(report.now, t());
        assert_eq!(report.changed(), 0);
    }

    #[tokio::test]
    async fn test_tick_surfaces_store_errors() {
        let repo = Arc::new(LocalRepository::new());
        repo.set_healthy(false);
        let reconciler = Reconciler::new(repo, Arc::new(ManualClock::new(t())), fast_config());

        let err = reconciler.tick().await.unwrap_err();
        assert!(matches!(err, TickError::Repository(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_on_start_ticks_immediately() {
        let repo = Arc::new(LocalRepository::new());
        let user = repo
            .create_user(&NewUser::new("dr_sen", "pw", Role::Doctor))
            .await
            .unwrap();
        let schedule = repo
            .create_schedule(
                &NewSchedule::new(
                    user.id,
                    t() - chrono::Duration::hours(2),
                    t() - chrono::Duration::minutes(1),
                    true,
                )
                .unwrap(),
            )
            .await
            .unwrap();

        let config = ReconcilerConfig {
            run_on_start: true,
            ..fast_config()
        };
        let handle =
            Reconciler::new(repo.clone(), Arc::new(ManualClock::new(t())), config).spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(handle.stats().ticks_succeeded, 1);
        assert!(!repo.schedule_snapshot(schedule.id).unwrap().is_available);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_the_loop() {
        let repo = Arc::new(LocalRepository::new());
        let handle =
            Reconciler::new(repo, Arc::new(ManualClock::new(t())), fast_config()).spawn();
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(handle.stats().ticks_succeeded, 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_resume_uses_breaks_inserted_directly() {
        let repo = Arc::new(LocalRepository::new());
        let user = repo
            .create_user(&NewUser::new("qa_das", "pw", Role::Qa))
            .await
            .unwrap();
        let schedule = repo
            .create_schedule(
                &NewSchedule::new(
                    user.id,
                    t() - chrono::Duration::minutes(10),
                    t() + chrono::Duration::minutes(10),
                    false,
                )
                .unwrap(),
            )
            .await
            .unwrap();
        repo.insert_break(&NewBreak::starting_at(
            user.id,
            t() - chrono::Duration::minutes(5),
            chrono::Duration::minutes(4),
        ))
        .unwrap();

        let reconciler = Reconciler::new(repo.clone(), Arc::new(ManualClock::new(t())), fast_config());
        let report = reconciler.tick().await.unwrap();

        assert_eq!(report.resumed, 1);
        assert!(repo.schedule_snapshot(schedule.id).unwrap().is_available);
    }
}
