//! In-memory login sessions keyed by bearer token.
//!
//! Sessions expire a fixed time after login. Expired entries are evicted when
//! looked up and pruned whenever a new session is opened, so the map stays
//! bounded by the number of logins within one TTL.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Role, User, UserId};

use super::roster::Actor;

/// Default session lifetime: one working shift.
pub const DEFAULT_SESSION_TTL_MINS: i64 = 12 * 60;

/// A logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.user_id,
            role: self.role,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Token to session map shared by all request handlers.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_ttl(Duration::minutes(DEFAULT_SESSION_TTL_MINS))
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Open a session for `user` and return it. Every call issues a fresh token
    /// and drops sessions that have expired by `now`.
    pub fn create(&self, user: &User, now: DateTime<Utc>) -> Session {
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id: user.id,
            username: user.username.clone(),
            role: user.role,
            created_at: now,
            expires_at: now + self.ttl,
        };

        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        let pruned = before - sessions.len();
        if pruned > 0 {
            debug!(pruned, "pruned expired sessions");
        }
        sessions.insert(session.token.clone(), session.clone());
        session
    }

    /// Look up a live session. An expired one is evicted and reported as absent.
    pub fn get(&self, token: &str, now: DateTime<Utc>) -> Option<Session> {
        {
            let sessions = self.sessions.read();
            match sessions.get(token) {
                Some(session) if !session.is_expired(now) => return Some(session.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.sessions.write().remove(token);
        None
    }

    /// Close a session. Returns false when the token was unknown.
    pub fn remove(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
