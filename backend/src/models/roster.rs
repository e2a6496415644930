//! Users, availability windows and breaks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::define_id_type;

define_id_type!(i64, UserId);
define_id_type!(i64, ScheduleId);
define_id_type!(i64, BreakId);

/// Staff role. Stored and transmitted as its lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Qa,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Qa => "qa",
            Role::Admin => "admin",
        }
    }

    /// Doctors and QA staff declare availability windows and take breaks.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Doctor | Role::Qa)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "doctor" => Ok(Role::Doctor),
            "qa" => Ok(Role::Qa),
            "admin" => Ok(Role::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// A user account. The password is the plaintext secret matched at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role: Role,
}

/// A user that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub role: Role,
}

impl NewUser {
    pub fn new(username: impl Into<String>, password: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            role,
        }
    }
}

/// An availability window `[start_time, end_time)` declared by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_available: bool,
}

impl Schedule {
    /// True when `now` falls inside `[start_time, end_time)`.
    pub fn covers(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }

    /// True once the window has strictly ended.
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_time < now
    }
}

/// Schedule data for insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSchedule {
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_available: bool,
}

impl NewSchedule {
    /// Build a window, rejecting empty or inverted intervals.
    pub fn new(
        user_id: UserId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        is_available: bool,
    ) -> Result<Self, String> {
        if end_time <= start_time {
            return Err(format!(
                "Schedule end {} must be after start {}",
                end_time, start_time
            ));
        }
        Ok(Self {
            user_id,
            start_time,
            end_time,
            is_available,
        })
    }
}

/// A timed break `[start_time, end_time)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Break {
    pub id: BreakId,
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Break {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }

    /// Breaks that ended strictly before `now` no longer affect availability.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_time < now
    }
}

/// Break data for insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBreak {
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl NewBreak {
    /// A break that starts at `start_time` and lasts `duration`.
    pub fn starting_at(user_id: UserId, start_time: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            user_id,
            start_time,
            end_time: start_time + duration,
        }
    }
}

/// A schedule joined with its owner, as listed on the dashboard and admin panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleView {
    pub schedule_id: ScheduleId,
    pub username: String,
    pub role: Role,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_available: bool,
}

/// A break joined with its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakView {
    pub break_id: BreakId,
    pub username: String,
    pub role: Role,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}
