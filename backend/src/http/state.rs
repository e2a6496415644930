//! Application state for the HTTP server.

use std::sync::Arc;

use crate::db::repository::FullRepository;
use crate::models::Clock;
use crate::services::{RosterService, SessionStore};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Used directly only by the health check
    pub repository: Arc<dyn FullRepository>,
    pub roster: RosterService,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(repository: Arc<dyn FullRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            roster: RosterService::new(Arc::clone(&repository), clock),
            repository,
            sessions: SessionStore::new(),
        }
    }

    /// Replace the session store with one whose logins last `ttl`.
    pub fn with_session_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.sessions = SessionStore::with_ttl(ttl);
        self
    }
}
