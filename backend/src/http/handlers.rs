//! HTTP handlers for the REST API.
//!
//! Each handler resolves the caller's session where needed and delegates to
//! [`RosterService`](crate::services::RosterService).

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use super::auth::{bearer_token, require_session};
use super::dto::{
    AdminOverview, AvailabilityRequest, AvailabilityUpdateRequest, BreakRequest, BreakResponse,
    Dashboard, HealthResponse, LoginRequest, LoginResponse, ScheduleResponse,
};
use super::error::AppError;
use super::state::AppState;
use crate::db::services as db_services;
use crate::models::{BreakId, ScheduleId};

/// Result type for handlers.
pub type HandlerResult<T> = Result<Json<T>, AppError>;

// =============================================================================
// Health Check
// =============================================================================

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> HandlerResult<HealthResponse> {
    let db_status = match db_services::health_check(state.repository.as_ref()).await {
        Ok(true) => "connected".to_string(),
        Ok(false) => "disconnected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: "v1".to_string(),
        database: db_status,
    }))
}

// =============================================================================
// Sessions
// =============================================================================

/// POST /v1/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> HandlerResult<LoginResponse> {
    let user = state
        .roster
        .login(&request.username, &request.password)
        .await?;
    let session = state.sessions.create(&user, state.roster.now());
    Ok(Json(session.into()))
}

/// POST /v1/logout
///
/// Always succeeds; unknown tokens are ignored.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    if let Some(token) = bearer_token(&headers) {
        state.sessions.remove(token);
    }
    StatusCode::NO_CONTENT
}

// =============================================================================
// Dashboard and staff actions
// =============================================================================

/// GET /v1/dashboard
pub async fn dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> HandlerResult<Dashboard> {
    require_session(&state, &headers)?;
    Ok(Json(state.roster.dashboard().await?))
}

/// POST /v1/availability
pub async fn set_availability(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AvailabilityRequest>,
) -> Result<(StatusCode, Json<ScheduleResponse>), AppError> {
    let session = require_session(&state, &headers)?;
    let schedule = state
        .roster
        .set_availability(session.actor(), request.start_time, request.end_time)
        .await?;
    Ok((StatusCode::CREATED, Json(schedule.into())))
}

/// POST /v1/breaks
pub async fn start_break(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BreakRequest>,
) -> Result<(StatusCode, Json<BreakResponse>), AppError> {
    let session = require_session(&state, &headers)?;
    let brk = state
        .roster
        .start_break(session.actor(), request.duration_minutes)
        .await?;
    Ok((StatusCode::CREATED, Json(brk.into())))
}

// =============================================================================
// Admin
// =============================================================================

/// GET /v1/admin
pub async fn admin_overview(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> HandlerResult<AdminOverview> {
    let session = require_session(&state, &headers)?;
    Ok(Json(state.roster.admin_overview(session.actor()).await?))
}

/// DELETE /v1/admin/schedules/{schedule_id}
pub async fn delete_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(schedule_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let session = require_session(&state, &headers)?;
    state
        .roster
        .delete_schedule(session.actor(), ScheduleId::new(schedule_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /v1/admin/breaks/{break_id}
pub async fn delete_break(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(break_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let session = require_session(&state, &headers)?;
    state
        .roster
        .delete_break(session.actor(), BreakId::new(break_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /v1/admin/schedules/{schedule_id}/availability
pub async fn set_schedule_availability(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(schedule_id): Path<i64>,
    Json(request): Json<AvailabilityUpdateRequest>,
) -> HandlerResult<ScheduleResponse> {
    let session = require_session(&state, &headers)?;
    let schedule = state
        .roster
        .set_schedule_availability(
            session.actor(),
            ScheduleId::new(schedule_id),
            request.is_available,
        )
        .await?;
    Ok(Json(schedule.into()))
}
