//! In-memory local repository implementation.
//!
//! Stores every record in ordered maps behind a single lock, providing fast,
//! deterministic and isolated execution for unit tests and local development.
//! Each write operation holds the lock for its whole body, which gives the
//! same all-or-nothing behaviour a database transaction would.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::db::repository::*;
use crate::models::*;

/// In-memory local repository.
///
/// # Example
/// ```
/// use clinic_roster::db::repositories::LocalRepository;
/// use clinic_roster::db::repository::UserRepository;
/// use clinic_roster::models::{NewUser, Role};
///
/// # tokio_test_block(async {
/// let repo = LocalRepository::new();
/// let user = repo.create_user(&NewUser::new("alice", "pw", Role::Doctor)).await.unwrap();
/// assert_eq!(user.username, "alice");
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct LocalRepository {
    data: Arc<RwLock<LocalData>>,
}

struct LocalData {
    users: BTreeMap<UserId, User>,
    schedules: BTreeMap<ScheduleId, Schedule>,
    breaks: BTreeMap<BreakId, Break>,

    // ID counters
    next_user_id: i64,
    next_schedule_id: i64,
    next_break_id: i64,

    // Connection health
    is_healthy: bool,
}

impl Default for LocalData {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            schedules: BTreeMap::new(),
            breaks: BTreeMap::new(),
            next_user_id: 1,
            next_schedule_id: 1,
            next_break_id: 1,
            is_healthy: true,
        }
    }
}

impl LocalData {
    fn schedule_view(&self, schedule: &Schedule) -> Option<ScheduleView> {
        self.users.get(&schedule.user_id).map(|user| ScheduleView {
            schedule_id: schedule.id,
            username: user.username.clone(),
            role: user.role,
            start_time: schedule.start_time,
            end_time: schedule.end_time,
            is_available: schedule.is_available,
        })
    }

    fn break_view(&self, brk: &Break) -> Option<BreakView> {
        self.users.get(&brk.user_id).map(|user| BreakView {
            break_id: brk.id,
            username: user.username.clone(),
            role: user.role,
            start_time: brk.start_time,
            end_time: brk.end_time,
        })
    }

    fn schedule_views<'a>(
        &self,
        schedules: impl Iterator<Item = &'a Schedule>,
    ) -> Vec<ScheduleView> {
        let mut views: Vec<ScheduleView> =
            schedules.filter_map(|s| self.schedule_view(s)).collect();
        views.sort_by_key(|v| (v.start_time, v.schedule_id));
        views
    }

    fn break_views<'a>(&self, breaks: impl Iterator<Item = &'a Break>) -> Vec<BreakView> {
        let mut views: Vec<BreakView> = breaks.filter_map(|b| self.break_view(b)).collect();
        views.sort_by_key(|v| (v.start_time, v.break_id));
        views
    }

    fn require_user(&self, user_id: UserId, operation: &str) -> RepositoryResult<()> {
        if self.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(RepositoryError::validation_with_context(
                format!("User {} does not exist", user_id),
                ErrorContext::new(operation)
                    .with_entity("user")
                    .with_entity_id(user_id),
            ))
        }
    }
}

impl LocalRepository {
    /// Create a new empty local repository.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(LocalData::default())),
        }
    }

    /// Set the health status for testing connection failures.
    ///
    /// While unhealthy every operation fails with a connection error.
    pub fn set_healthy(&self, healthy: bool) {
        self.data.write().is_healthy = healthy;
    }

    /// Clear all data from the repository.
    pub fn clear(&self) {
        let mut data = self.data.write();
        *data = LocalData {
            is_healthy: data.is_healthy,
            ..Default::default()
        };
    }

    pub fn schedule_count(&self) -> usize {
        self.data.read().schedules.len()
    }

    pub fn break_count(&self) -> usize {
        self.data.read().breaks.len()
    }

    /// Snapshot of a single schedule, bypassing the health flag.
    pub fn schedule_snapshot(&self, schedule_id: ScheduleId) -> Option<Schedule> {
        self.data.read().schedules.get(&schedule_id).cloned()
    }

    /// Insert a break without touching any schedule.
    ///
    /// Useful for setting up historical data: `start_break` would also flip
    /// the owner's schedules to unavailable.
    pub fn insert_break(&self, new_break: &NewBreak) -> RepositoryResult<Break> {
        let mut data = self.data.write();
        Self::check_health_of(&data)?;
        data.require_user(new_break.user_id, "insert_break")?;
        Ok(Self::insert_break_locked(&mut data, new_break))
    }

    fn check_health_of(data: &LocalData) -> RepositoryResult<()> {
        if !data.is_healthy {
            return Err(RepositoryError::connection("Database is not healthy"));
        }
        Ok(())
    }

    /// Helper to check health and return error if unhealthy.
    fn check_health(&self) -> RepositoryResult<()> {
        Self::check_health_of(&self.data.read())
    }

    fn insert_break_locked(data: &mut LocalData, new_break: &NewBreak) -> Break {
        let id = BreakId::new(data.next_break_id);
        data.next_break_id += 1;
        let brk = Break {
            id,
            user_id: new_break.user_id,
            start_time: new_break.start_time,
            end_time: new_break.end_time,
        };
        data.breaks.insert(id, brk.clone());
        brk
    }

    fn schedule_not_found(schedule_id: ScheduleId, operation: &str) -> RepositoryError {
        RepositoryError::not_found_with_context(
            format!("Schedule {} not found", schedule_id),
            ErrorContext::new(operation)
                .with_entity("schedule")
                .with_entity_id(schedule_id),
        )
    }
}

impl Default for LocalRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepository for LocalRepository {
    async fn create_user(&self, user: &NewUser) -> RepositoryResult<User> {
        let mut data = self.data.write();
        Self::check_health_of(&data)?;

        if user.username.trim().is_empty() {
            return Err(RepositoryError::validation("Username must not be empty"));
        }
        if data.users.values().any(|u| u.username == user.username) {
            return Err(RepositoryError::validation_with_context(
                format!("Username '{}' is already taken", user.username),
                ErrorContext::new("create_user").with_entity("user"),
            ));
        }

        let id = UserId::new(data.next_user_id);
        data.next_user_id += 1;
        let stored = User {
            id,
            username: user.username.clone(),
            password: user.password.clone(),
            role: user.role,
        };
        data.users.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_user(&self, user_id: UserId) -> RepositoryResult<User> {
        self.check_health()?;
        self.data.read().users.get(&user_id).cloned().ok_or_else(|| {
            RepositoryError::not_found_with_context(
                format!("User {} not found", user_id),
                ErrorContext::new("get_user")
                    .with_entity("user")
                    .with_entity_id(user_id),
            )
        })
    }

    async fn find_user_by_username(&self, username: &str) -> RepositoryResult<Option<User>> {
        self.check_health()?;
        Ok(self
            .data
            .read()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_user_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> RepositoryResult<Option<User>> {
        self.check_health()?;
        Ok(self
            .data
            .read()
            .users
            .values()
            .find(|u| u.username == username && u.password == password)
            .cloned())
    }

    async fn list_users(&self) -> RepositoryResult<Vec<User>> {
        self.check_health()?;
        Ok(self.data.read().users.values().cloned().collect())
    }
}

#[async_trait]
impl ScheduleRepository for LocalRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        Ok(self.data.read().is_healthy)
    }

    async fn create_schedule(&self, schedule: &NewSchedule) -> RepositoryResult<Schedule> {
        let mut data = self.data.write();
        Self::check_health_of(&data)?;
        data.require_user(schedule.user_id, "create_schedule")?;

        let id = ScheduleId::new(data.next_schedule_id);
        data.next_schedule_id += 1;
        let stored = Schedule {
            id,
            user_id: schedule.user_id,
            start_time: schedule.start_time,
            end_time: schedule.end_time,
            is_available: schedule.is_available,
        };
        data.schedules.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_schedule(&self, schedule_id: ScheduleId) -> RepositoryResult<Schedule> {
        self.check_health()?;
        self.data
            .read()
            .schedules
            .get(&schedule_id)
            .cloned()
            .ok_or_else(|| Self::schedule_not_found(schedule_id, "get_schedule"))
    }

    async fn list_schedules(&self) -> RepositoryResult<Vec<ScheduleView>> {
        self.check_health()?;
        let data = self.data.read();
        Ok(data.schedule_views(data.schedules.values()))
    }

    async fn list_available_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<ScheduleView>> {
        self.check_health()?;
        let data = self.data.read();
        Ok(data.schedule_views(
            data.schedules
                .values()
                .filter(|s| s.end_time > now && s.is_available),
        ))
    }

    async fn set_schedule_availability(
        &self,
        schedule_id: ScheduleId,
        is_available: bool,
    ) -> RepositoryResult<Schedule> {
        let mut data = self.data.write();
        Self::check_health_of(&data)?;
        let schedule = data
            .schedules
            .get_mut(&schedule_id)
            .ok_or_else(|| Self::schedule_not_found(schedule_id, "set_schedule_availability"))?;
        schedule.is_available = is_available;
        Ok(schedule.clone())
    }

    async fn delete_schedule(&self, schedule_id: ScheduleId) -> RepositoryResult<()> {
        let mut data = self.data.write();
        Self::check_health_of(&data)?;
        data.schedules
            .remove(&schedule_id)
            .map(|_| ())
            .ok_or_else(|| Self::schedule_not_found(schedule_id, "delete_schedule"))
    }
}

#[async_trait]
impl BreakRepository for LocalRepository {
    async fn start_break(
        &self,
        new_break: &NewBreak,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Break> {
        let mut data = self.data.write();
        Self::check_health_of(&data)?;
        data.require_user(new_break.user_id, "start_break")?;

        let brk = Self::insert_break_locked(&mut data, new_break);
        for schedule in data.schedules.values_mut() {
            if schedule.user_id == new_break.user_id && schedule.end_time > now {
                schedule.is_available = false;
            }
        }
        Ok(brk)
    }

    async fn list_breaks(&self) -> RepositoryResult<Vec<BreakView>> {
        self.check_health()?;
        let data = self.data.read();
        Ok(data.break_views(data.breaks.values()))
    }

    async fn list_active_breaks(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<BreakView>> {
        self.check_health()?;
        let data = self.data.read();
        Ok(data.break_views(data.breaks.values().filter(|b| b.end_time > now)))
    }

    async fn delete_break(&self, break_id: BreakId) -> RepositoryResult<()> {
        let mut data = self.data.write();
        Self::check_health_of(&data)?;
        data.breaks.remove(&break_id).map(|_| ()).ok_or_else(|| {
            RepositoryError::not_found_with_context(
                format!("Break {} not found", break_id),
                ErrorContext::new("delete_break")
                    .with_entity("break")
                    .with_entity_id(break_id),
            )
        })
    }
}

#[async_trait]
impl ReconciliationRepository for LocalRepository {
    async fn reconcile_availability(
        &self,
        now: DateTime<Utc>,
    ) -> RepositoryResult<ReconcileOutcome> {
        let mut guard = self.data.write();
        Self::check_health_of(&guard)
            .map_err(|e| e.with_operation("reconcile_availability"))?;
        let data = &mut *guard;
        let mut outcome = ReconcileOutcome::default();

        for schedule in data.schedules.values_mut() {
            if schedule.end_time < now && schedule.is_available {
                schedule.is_available = false;
                outcome.expired += 1;
            }
        }

        let users_back_from_break: HashSet<UserId> = data
            .breaks
            .values()
            .filter(|b| b.end_time < now)
            .map(|b| b.user_id)
            .collect();

        for schedule in data.schedules.values_mut() {
            if schedule.end_time > now
                && users_back_from_break.contains(&schedule.user_id)
                && !schedule.is_available
            {
                schedule.is_available = true;
                outcome.resumed += 1;
            }
        }

        Ok(outcome)
    }
}
