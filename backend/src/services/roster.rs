//! Roster operations: login, the shared dashboard, availability windows,
//! breaks and the admin actions.
//!
//! Every operation that writes a timestamp reads it from the injected
//! [`Clock`], the same one the reconciler uses.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::repository::{FullRepository, RepositoryError};
use crate::models::{
    Break, BreakId, BreakView, Clock, NewBreak, NewSchedule, Role, Schedule, ScheduleId,
    ScheduleView, User, UserId,
};

/// Longest break a user may start, in minutes.
pub const MAX_BREAK_MINUTES: i64 = 720;

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type RosterResult<T> = Result<T, RosterError>;

/// Who is performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    fn require_staff(&self, action: &str) -> RosterResult<()> {
        if self.role.is_staff() {
            Ok(())
        } else {
            Err(RosterError::Forbidden(format!(
                "only doctors and QA staff may {}",
                action
            )))
        }
    }

    fn require_admin(&self) -> RosterResult<()> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(RosterError::Forbidden(
                "admin privileges required".to_string(),
            ))
        }
    }
}

/// Who is available right now and who is on break.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub now: DateTime<Utc>,
    pub timezone: String,
    pub available: Vec<ScheduleView>,
    pub on_break: Vec<BreakView>,
}

/// Every schedule and break, for the admin page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminOverview {
    pub schedules: Vec<ScheduleView>,
    pub breaks: Vec<BreakView>,
}

#[derive(Clone)]
pub struct RosterService {
    repository: Arc<dyn FullRepository>,
    clock: Arc<dyn Clock>,
}

impl RosterService {
    pub fn new(repository: Arc<dyn FullRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn login(&self, username: &str, password: &str) -> RosterResult<User> {
        match self
            .repository
            .find_user_by_credentials(username, password)
            .await?
        {
            Some(user) => {
                info!(user = %user.username, role = %user.role, "user logged in");
                Ok(user)
            }
            None => {
                warn!(user = %username, "rejected login");
                Err(RosterError::Unauthorized(
                    "invalid username or password".to_string(),
                ))
            }
        }
    }

    pub async fn dashboard(&self) -> RosterResult<Dashboard> {
        let now = self.clock.now();
        let available = self.repository.list_available_schedules(now).await?;
        let on_break = self.repository.list_active_breaks(now).await?;
        Ok(Dashboard {
            now,
            timezone: self.clock.timezone().name().to_string(),
            available,
            on_break,
        })
    }

    /// Declare an availability window given in local wall-clock time.
    pub async fn set_availability(
        &self,
        actor: Actor,
        start_local: NaiveDateTime,
        end_local: NaiveDateTime,
    ) -> RosterResult<Schedule> {
        actor.require_staff("set availability")?;

        let start = self.localize(start_local, "start")?;
        let end = self.localize(end_local, "end")?;
        let new_schedule =
            NewSchedule::new(actor.user_id, start, end, true).map_err(RosterError::Validation)?;

        let schedule = self.repository.create_schedule(&new_schedule).await?;
        info!(
            user_id = %actor.user_id,
            schedule_id = %schedule.id,
            start = %schedule.start_time,
            end = %schedule.end_time,
            "availability set"
        );
        Ok(schedule)
    }

    /// Start a break now and mark the user's open windows unavailable.
    pub async fn start_break(&self, actor: Actor, duration_minutes: i64) -> RosterResult<Break> {
        actor.require_staff("take a break")?;
        if !(1..=MAX_BREAK_MINUTES).contains(&duration_minutes) {
            return Err(RosterError::Validation(format!(
                "break duration must be between 1 and {} minutes, got {}",
                MAX_BREAK_MINUTES, duration_minutes
            )));
        }

        let now = self.clock.now();
        let new_break =
            NewBreak::starting_at(actor.user_id, now, Duration::minutes(duration_minutes));
        let brk = self.repository.start_break(&new_break, now).await?;
        info!(
            user_id = %actor.user_id,
            break_id = %brk.id,
            until = %brk.end_time,
            "break started"
        );
        Ok(brk)
    }

    pub async fn admin_overview(&self, actor: Actor) -> RosterResult<AdminOverview> {
        actor.require_admin()?;
        Ok(AdminOverview {
            schedules: self.repository.list_schedules().await?,
            breaks: self.repository.list_breaks().await?,
        })
    }

    pub async fn delete_schedule(&self, actor: Actor, schedule_id: ScheduleId) -> RosterResult<()> {
        actor.require_admin()?;
        self.repository.delete_schedule(schedule_id).await?;
        info!(%schedule_id, "schedule deleted");
        Ok(())
    }

    pub async fn delete_break(&self, actor: Actor, break_id: BreakId) -> RosterResult<()> {
        actor.require_admin()?;
        self.repository.delete_break(break_id).await?;
        info!(%break_id, "break deleted");
        Ok(())
    }

    pub async fn set_schedule_availability(
        &self,
        actor: Actor,
        schedule_id: ScheduleId,
        is_available: bool,
    ) -> RosterResult<Schedule> {
        actor.require_admin()?;
        let schedule = self
            .repository
            .set_schedule_availability(schedule_id, is_available)
            .await?;
        info!(%schedule_id, is_available, "schedule availability overridden");
        Ok(schedule)
    }

    fn localize(&self, local: NaiveDateTime, which: &str) -> RosterResult<DateTime<Utc>> {
        self.clock.localize(local).ok_or_else(|| {
            RosterError::Validation(format!(
                "{} time {} does not exist in {}",
                which,
                local,
                self.clock.timezone().name()
            ))
        })
    }
}
