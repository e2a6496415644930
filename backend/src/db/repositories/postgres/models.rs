use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::schema::{breaks, schedules, users};
use crate::db::repository::{ErrorContext, RepositoryError, RepositoryResult};
use crate::models::{
    Break, BreakId, BreakView, NewBreak, NewSchedule, NewUser, Role, Schedule, ScheduleId,
    ScheduleView, User, UserId,
};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub role: String,
}

impl UserRow {
    /// Roles are stored as text; anything outside the enum is a corrupt row.
    fn parse_role(&self) -> RepositoryResult<Role> {
        self.role.parse().map_err(|e: String| {
            RepositoryError::internal_with_context(
                e,
                ErrorContext::new("decode_user")
                    .with_entity("user")
                    .with_entity_id(self.id),
            )
        })
    }

    pub fn into_user(self) -> RepositoryResult<User> {
        let role = self.parse_role()?;
        Ok(User {
            id: UserId::new(self.id),
            username: self.username,
            password: self.password,
            role,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUserRow {
    pub username: String,
    pub password: String,
    pub role: String,
}

impl From<&NewUser> for NewUserRow {
    fn from(user: &NewUser) -> Self {
        Self {
            username: user.username.clone(),
            password: user.password.clone(),
            role: user.role.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schedules)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ScheduleRow {
    pub id: i64,
    pub user_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_available: bool,
}

impl From<ScheduleRow> for Schedule {
    fn from(row: ScheduleRow) -> Self {
        Schedule {
            id: ScheduleId::new(row.id),
            user_id: UserId::new(row.user_id),
            start_time: row.start_time,
            end_time: row.end_time,
            is_available: row.is_available,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schedules)]
pub struct NewScheduleRow {
    pub user_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_available: bool,
}

impl From<&NewSchedule> for NewScheduleRow {
    fn from(schedule: &NewSchedule) -> Self {
        Self {
            user_id: schedule.user_id.value(),
            start_time: schedule.start_time,
            end_time: schedule.end_time,
            is_available: schedule.is_available,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = breaks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BreakRow {
    pub id: i64,
    pub user_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl From<BreakRow> for Break {
    fn from(row: BreakRow) -> Self {
        Break {
            id: BreakId::new(row.id),
            user_id: UserId::new(row.user_id),
            start_time: row.start_time,
            end_time: row.end_time,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = breaks)]
pub struct NewBreakRow {
    pub user_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl From<&NewBreak> for NewBreakRow {
    fn from(b: &NewBreak) -> Self {
        Self {
            user_id: b.user_id.value(),
            start_time: b.start_time,
            end_time: b.end_time,
        }
    }
}

pub fn schedule_view(row: ScheduleRow, owner: UserRow) -> RepositoryResult<ScheduleView> {
    let role = owner.parse_role()?;
    Ok(ScheduleView {
        schedule_id: ScheduleId::new(row.id),
        username: owner.username,
        role,
        start_time: row.start_time,
        end_time: row.end_time,
        is_available: row.is_available,
    })
}

pub fn break_view(row: BreakRow, owner: UserRow) -> RepositoryResult<BreakView> {
    let role = owner.parse_role()?;
    Ok(BreakView {
        break_id: BreakId::new(row.id),
        username: owner.username,
        role,
        start_time: row.start_time,
        end_time: row.end_time,
    })
}
