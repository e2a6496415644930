//! Availability window operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::RepositoryResult;
use crate::models::{NewSchedule, Schedule, ScheduleId, ScheduleView};

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    // ==================== Health & Connection ====================

    /// Check if the store is reachable.
    ///
    /// # Returns
    /// - `Ok(true)` if the store is healthy
    /// - `Ok(false)` if it is unhealthy but no error occurred
    /// - `Err(RepositoryError)` if the check itself failed
    async fn health_check(&self) -> RepositoryResult<bool>;

    // ==================== Schedule Operations ====================

    /// Insert a new availability window for an existing user.
    async fn create_schedule(&self, schedule: &NewSchedule) -> RepositoryResult<Schedule>;

    async fn get_schedule(&self, schedule_id: ScheduleId) -> RepositoryResult<Schedule>;

    /// All schedules joined with their owners, ordered by start time.
    async fn list_schedules(&self) -> RepositoryResult<Vec<ScheduleView>>;

    /// Schedules with `end_time > now` and the availability flag set.
    async fn list_available_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<ScheduleView>>;

    /// Overwrite the availability flag of one schedule.
    async fn set_schedule_availability(
        &self,
        schedule_id: ScheduleId,
        is_available: bool,
    ) -> RepositoryResult<Schedule>;

    /// Delete a schedule, or `NotFound`.
    async fn delete_schedule(&self, schedule_id: ScheduleId) -> RepositoryResult<()>;
}
