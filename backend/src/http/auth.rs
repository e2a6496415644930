//! Bearer-token extraction.

use axum::http::{header, HeaderMap};

use super::error::AppError;
use super::state::AppState;
use crate::services::Session;

/// Token from an `Authorization: Bearer <token>` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve the caller's session or fail with 401.
pub fn require_session(state: &AppState, headers: &HeaderMap) -> Result<Session, AppError> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
    state
        .sessions
        .get(token, state.roster.now())
        .ok_or_else(|| AppError::Unauthorized("session expired or unknown".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
