//! Request and response bodies for the HTTP API.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{Break, Role, Schedule};
use crate::services::Session;

pub use crate::services::{AdminOverview, Dashboard};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Bearer token for subsequent requests
    pub token: String,
    pub username: String,
    pub role: Role,
}

impl From<Session> for LoginResponse {
    fn from(session: Session) -> Self {
        Self {
            token: session.token,
            username: session.username,
            role: session.role,
        }
    }
}

/// Availability window in the clinic's local wall-clock time.
///
/// Accepts `2024-07-01T09:00` (as sent by `datetime-local` inputs) as well as
/// values with seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRequest {
    #[serde(deserialize_with = "deserialize_local_datetime")]
    pub start_time: NaiveDateTime,
    #[serde(deserialize_with = "deserialize_local_datetime")]
    pub end_time: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakRequest {
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityUpdateRequest {
    pub is_available: bool,
}

/// A schedule as returned to its owner or an admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub schedule_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_available: bool,
}

impl From<Schedule> for ScheduleResponse {
    fn from(schedule: Schedule) -> Self {
        Self {
            schedule_id: schedule.id.value(),
            start_time: schedule.start_time,
            end_time: schedule.end_time,
            is_available: schedule.is_available,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakResponse {
    pub break_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl From<Break> for BreakResponse {
    fn from(brk: Break) -> Self {
        Self {
            break_id: brk.id.value(),
            start_time: brk.start_time,
            end_time: brk.end_time,
        }
    }
}

const LOCAL_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Parse a naive local timestamp in any of the accepted formats.
pub fn parse_local_datetime(raw: &str) -> Result<NaiveDateTime, String> {
    let raw = raw.trim();
    LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| format!("invalid local date-time '{}', expected YYYY-MM-DDTHH:MM", raw))
}

fn deserialize_local_datetime<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_local_datetime(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_datetime_formats() {
        let minutes = parse_local_datetime("2024-07-01T09:30").unwrap();
        let seconds = parse_local_datetime("2024-07-01T09:30:00").unwrap();
        assert_eq!(minutes, seconds);
        assert!(parse_local_datetime("2024-07-01T09:30:15.250").is_ok());
        assert!(parse_local_datetime("01/07/2024 09:30").is_err());
    }

    #[test]
    fn test_availability_request_rejects_garbage() {
        let ok: Result<AvailabilityRequest, _> = serde_json::from_str(
            r#"{"start_time":"2024-07-01T09:00","end_time":"2024-07-01T17:00"}"#,
        );
        assert!(ok.is_ok());

        let bad: Result<AvailabilityRequest, _> =
            serde_json::from_str(r#"{"start_time":"nine","end_time":"2024-07-01T17:00"}"#);
        assert!(bad.is_err());
    }
}
