//! Availability reconciliation against the in-memory repository.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use proptest::prelude::*;
use tracing_subscriber::fmt::MakeWriter;

use clinic_roster::db::repositories::LocalRepository;
use clinic_roster::db::repository::{
    BreakRepository, ReconcileOutcome, ReconciliationRepository, RepositoryResult,
    ScheduleRepository, UserRepository,
};
use clinic_roster::models::{
    Break, BreakId, BreakView, ManualClock, NewBreak, NewSchedule, NewUser, Role, Schedule,
    ScheduleId, ScheduleView, User, UserId,
};
use clinic_roster::services::{Reconciler, ReconcilerConfig, TickError};

fn t() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 6, 30, 0).unwrap()
}

fn every_minute() -> ReconcilerConfig {
    ReconcilerConfig {
        interval: StdDuration::from_secs(60),
        tick_timeout: Some(StdDuration::from_secs(30)),
        run_on_start: false,
    }
}

async fn user(repo: &LocalRepository, name: &str) -> UserId {
    repo.create_user(&NewUser::new(name, "pw", Role::Doctor))
        .await
        .unwrap()
        .id
}

async fn schedule(
    repo: &LocalRepository,
    user_id: UserId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    is_available: bool,
) -> ScheduleId {
    repo.create_schedule(&NewSchedule::new(user_id, start, end, is_available).unwrap())
        .await
        .unwrap()
        .id
}

fn reconciler(repo: &Arc<LocalRepository>, clock: &Arc<ManualClock>) -> Reconciler {
    Reconciler::new(repo.clone(), clock.clone(), every_minute())
}

fn flag(repo: &LocalRepository, id: ScheduleId) -> bool {
    repo.schedule_snapshot(id).unwrap().is_available
}

/// Formatted log output collected in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Route this thread's logs into a buffer until the guard drops. The paused
/// test runtime is single-threaded, so the spawned loop logs here too.
fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}

/// Store whose reconciliation statement never returns, as with a lock held
/// forever by another session. Everything else goes to the in-memory store.
struct StalledStore {
    inner: LocalRepository,
}

#[async_trait]
impl UserRepository for StalledStore {
    async fn create_user(&self, user: &NewUser) -> RepositoryResult<User> {
        self.inner.create_user(user).await
    }

    async fn get_user(&self, user_id: UserId) -> RepositoryResult<User> {
        self.inner.get_user(user_id).await
    }

    async fn find_user_by_username(&self, username: &str) -> RepositoryResult<Option<User>> {
        self.inner.find_user_by_username(username).await
    }

    async fn find_user_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> RepositoryResult<Option<User>> {
        self.inner.find_user_by_credentials(username, password).await
    }

    async fn list_users(&self) -> RepositoryResult<Vec<User>> {
        self.inner.list_users().await
    }
}

#[async_trait]
impl ScheduleRepository for StalledStore {
    async fn health_check(&self) -> RepositoryResult<bool> {
        self.inner.health_check().await
    }

    async fn create_schedule(&self, schedule: &NewSchedule) -> RepositoryResult<Schedule> {
        self.inner.create_schedule(schedule).await
    }

    async fn get_schedule(&self, schedule_id: ScheduleId) -> RepositoryResult<Schedule> {
        self.inner.get_schedule(schedule_id).await
    }

    async fn list_schedules(&self) -> RepositoryResult<Vec<ScheduleView>> {
        self.inner.list_schedules().await
    }

    async fn list_available_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<ScheduleView>> {
        self.inner.list_available_schedules(now).await
    }

    async fn set_schedule_availability(
        &self,
        schedule_id: ScheduleId,
        is_available: bool,
    ) -> RepositoryResult<Schedule> {
        self.inner
            .set_schedule_availability(schedule_id, is_available)
            .await
    }

    async fn delete_schedule(&self, schedule_id: ScheduleId) -> RepositoryResult<()> {
        self.inner.delete_schedule(schedule_id).await
    }
}

#[async_trait]
impl BreakRepository for StalledStore {
    async fn start_break(
        &self,
        new_break: &NewBreak,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Break> {
        self.inner.start_break(new_break, now).await
    }

    async fn list_breaks(&self) -> RepositoryResult<Vec<BreakView>> {
        self.inner.list_breaks().await
    }

    async fn list_active_breaks(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<BreakView>> {
        self.inner.list_active_breaks(now).await
    }

    async fn delete_break(&self, break_id: BreakId) -> RepositoryResult<()> {
        self.inner.delete_break(break_id).await
    }
}

#[async_trait]
impl ReconciliationRepository for StalledStore {
    async fn reconcile_availability(
        &self,
        _now: DateTime<Utc>,
    ) -> RepositoryResult<ReconcileOutcome> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_expired_schedule_becomes_unavailable() {
    let repo = Arc::new(LocalRepository::new());
    let u1 = user(&repo, "u1").await;
    let s1 = schedule(&repo, u1, t() - Duration::minutes(10), t() - Duration::minutes(1), true).await;

    let report = reconciler(&repo, &Arc::new(ManualClock::new(t())))
        .tick()
        .await
        .unwrap();

    assert_eq!(report.expired, 1);
    assert_eq!(report.resumed, 0);
    assert!(!flag(&repo, s1));
}

#[tokio::test]
async fn test_schedule_resumes_after_break_ends() {
    let repo = Arc::new(LocalRepository::new());
    let u2 = user(&repo, "u2").await;
    let s2 = schedule(&repo, u2, t() - Duration::minutes(10), t() + Duration::minutes(10), false).await;
    repo.insert_break(&NewBreak::starting_at(
        u2,
        t() - Duration::minutes(5),
        Duration::minutes(4),
    ))
    .unwrap();

    let report = reconciler(&repo, &Arc::new(ManualClock::new(t())))
        .tick()
        .await
        .unwrap();

    assert_eq!(report.resumed, 1);
    assert!(flag(&repo, s2));
}

#[tokio::test]
async fn test_break_still_running_keeps_schedule_unavailable() {
    let repo = Arc::new(LocalRepository::new());
    let u = user(&repo, "u").await;
    let s = schedule(&repo, u, t() - Duration::minutes(10), t() + Duration::minutes(50), false).await;
    repo.insert_break(&NewBreak::starting_at(u, t() - Duration::minutes(5), Duration::minutes(15)))
        .unwrap();

    let report = reconciler(&repo, &Arc::new(ManualClock::new(t())))
        .tick()
        .await
        .unwrap();

    assert_eq!(report.changed(), 0);
    assert!(!flag(&repo, s));
}

#[tokio::test]
async fn test_future_schedule_without_break_untouched() {
    let repo = Arc::new(LocalRepository::new());
    let u = user(&repo, "u").await;
    let on = schedule(&repo, u, t() + Duration::hours(1), t() + Duration::hours(2), true).await;
    let off = schedule(&repo, u, t() + Duration::hours(3), t() + Duration::hours(4), false).await;

    let report = reconciler(&repo, &Arc::new(ManualClock::new(t())))
        .tick()
        .await
        .unwrap();

    assert_eq!(report.changed(), 0);
    assert!(flag(&repo, on));
    assert!(!flag(&repo, off));
}

#[tokio::test]
async fn test_second_tick_is_a_no_op() {
    let repo = Arc::new(LocalRepository::new());
    let u1 = user(&repo, "u1").await;
    let u2 = user(&repo, "u2").await;
    schedule(&repo, u1, t() - Duration::minutes(10), t() - Duration::minutes(1), true).await;
    schedule(&repo, u2, t() - Duration::minutes(10), t() + Duration::minutes(10), false).await;
    repo.insert_break(&NewBreak::starting_at(u2, t() - Duration::minutes(5), Duration::minutes(4)))
        .unwrap();

    let reconciler = reconciler(&repo, &Arc::new(ManualClock::new(t())));
    let first = reconciler.tick().await.unwrap();
    let second = reconciler.tick().await.unwrap();

    assert_eq!((first.expired, first.resumed), (1, 1));
    assert_eq!(second.changed(), 0);
}

#[tokio::test]
async fn test_break_started_via_repository_then_resumed() {
    let repo = Arc::new(LocalRepository::new());
    let clock = Arc::new(ManualClock::new(t()));
    let u = user(&repo, "u").await;
    let s = schedule(&repo, u, t() - Duration::hours(1), t() + Duration::hours(1), true).await;

    repo.start_break(&NewBreak::starting_at(u, t(), Duration::minutes(15)), t())
        .await
        .unwrap();
    assert!(!flag(&repo, s));

    let reconciler = reconciler(&repo, &clock);
    clock.advance(Duration::minutes(10));
    reconciler.tick().await.unwrap();
    assert!(!flag(&repo, s));

    clock.advance(Duration::minutes(6));
    let report = reconciler.tick().await.unwrap();
    assert_eq!(report.resumed, 1);
    assert!(flag(&repo, s));
}

#[tokio::test(start_paused = true)]
async fn test_failed_tick_does_not_stop_the_loop() {
    let repo = Arc::new(LocalRepository::new());
    let clock = Arc::new(ManualClock::new(t()));
    let u1 = user(&repo, "u1").await;
    let s1 = schedule(&repo, u1, t() - Duration::minutes(10), t() - Duration::minutes(1), true).await;

    let (logs, _guard) = capture_logs();

    repo.set_healthy(false);
    let handle = reconciler(&repo, &clock).spawn();

    tokio::time::sleep(StdDuration::from_secs(61)).await;
    assert_eq!(handle.stats().ticks_failed, 1);
    assert_eq!(handle.stats().ticks_succeeded, 0);
    assert!(flag(&repo, s1));

    let output = logs.contents();
    let line = output
        .lines()
        .find(|line| line.contains("error updating availability statuses"))
        .unwrap_or_else(|| panic!("failed tick not logged:\n{output}"));
    assert!(line.contains("ERROR"), "{line}");
    assert!(line.contains("reconcile_availability"), "{line}");

    repo.set_healthy(true);
    tokio::time::sleep(StdDuration::from_secs(60)).await;
    assert_eq!(handle.stats().ticks_succeeded, 1);
    assert!(!flag(&repo, s1));
    assert!(handle.is_running());

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_loop_waits_one_interval_before_first_tick() {
    let repo = Arc::new(LocalRepository::new());
    let handle = reconciler(&repo, &Arc::new(ManualClock::new(t()))).spawn();

    tokio::time::sleep(StdDuration::from_secs(59)).await;
    assert_eq!(handle.stats().ticks_succeeded, 0);

    tokio::time::sleep(StdDuration::from_secs(2)).await;
    assert_eq!(handle.stats().ticks_succeeded, 1);

    let token = handle.cancellation_token();
    handle.shutdown().await.unwrap();
    assert!(token.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_tick_times_out() {
    let store = StalledStore {
        inner: LocalRepository::new(),
    };
    let u1 = user(&store.inner, "u1").await;
    let s1 = schedule(&store.inner, u1, t() - Duration::minutes(10), t() - Duration::minutes(1), true).await;
    let store = Arc::new(store);
    let clock = Arc::new(ManualClock::new(t()));

    let err = Reconciler::new(store.clone(), clock.clone(), every_minute())
        .tick()
        .await
        .unwrap_err();
    assert!(
        matches!(err, TickError::Timeout(limit) if limit == StdDuration::from_secs(30)),
        "unexpected error: {err}"
    );

    let (logs, _guard) = capture_logs();
    let handle = Reconciler::new(store.clone(), clock, every_minute()).spawn();

    // Ticks start at 60 s and 150 s; each gives up 30 s later.
    tokio::time::sleep(StdDuration::from_secs(200)).await;
    let stats = handle.stats();
    assert_eq!(stats.ticks_failed, 2);
    assert_eq!(stats.ticks_succeeded, 0);
    assert!(handle.is_running());
    assert!(flag(&store.inner, s1));
    assert!(logs.contents().contains("timed out after 30s"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unhealthy_store_surfaces_repository_error() {
    let repo = Arc::new(LocalRepository::new());
    repo.set_healthy(false);

    let err = reconciler(&repo, &Arc::new(ManualClock::new(t())))
        .tick()
        .await
        .unwrap_err();

    match err {
        TickError::Repository(e) => {
            assert_eq!(e.context().operation.as_deref(), Some("reconcile_availability"))
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ScheduleSpec {
    user: usize,
    start_offset: i64,
    length: i64,
    is_available: bool,
}

#[derive(Debug, Clone)]
struct BreakSpec {
    user: usize,
    start_offset: i64,
    length: i64,
}

const USERS: usize = 3;

fn schedule_spec() -> impl Strategy<Value = ScheduleSpec> {
    (0..USERS, -120i64..120, 1i64..180, any::<bool>()).prop_map(
        |(user, start_offset, length, is_available)| ScheduleSpec {
            user,
            start_offset,
            length,
            is_available,
        },
    )
}

fn break_spec() -> impl Strategy<Value = BreakSpec> {
    (0..USERS, -120i64..60, 1i64..60).prop_map(|(user, start_offset, length)| BreakSpec {
        user,
        start_offset,
        length,
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_tick_applies_both_transitions(
        schedules in prop::collection::vec(schedule_spec(), 0..12),
        breaks in prop::collection::vec(break_spec(), 0..6),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let repo = Arc::new(LocalRepository::new());
            let mut users = Vec::new();
            for i in 0..USERS {
                users.push(user(&repo, &format!("user{i}")).await);
            }

            let mut before: HashMap<ScheduleId, Schedule> = HashMap::new();
            for spec in &schedules {
                let start = t() + Duration::minutes(spec.start_offset);
                let end = start + Duration::minutes(spec.length);
                let id = schedule(&repo, users[spec.user], start, end, spec.is_available).await;
                before.insert(id, repo.schedule_snapshot(id).unwrap());
            }
            let mut back_from_break = vec![false; USERS];
            for spec in &breaks {
                let brk = repo
                    .insert_break(&NewBreak::starting_at(
                        users[spec.user],
                        t() + Duration::minutes(spec.start_offset),
                        Duration::minutes(spec.length),
                    ))
                    .unwrap();
                if brk.end_time < t() {
                    back_from_break[spec.user] = true;
                }
            }

            let reconciler = reconciler(&repo, &Arc::new(ManualClock::new(t())));
            reconciler.tick().await.unwrap();

            for (id, old) in &before {
                let new = repo.schedule_snapshot(*id).unwrap();
                let owner = users.iter().position(|u| *u == old.user_id).unwrap();
                if old.end_time < t() {
                    assert!(!new.is_available, "expired schedule {id} still available");
                } else if old.end_time > t() && back_from_break[owner] {
                    assert!(new.is_available, "schedule {id} not resumed after break");
                } else {
                    assert_eq!(new.is_available, old.is_available, "schedule {id} changed");
                }
            }

            let again = reconciler.tick().await.unwrap();
            assert_eq!(again.changed(), 0);
        });
    }
}
