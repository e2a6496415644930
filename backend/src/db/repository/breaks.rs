//! Break operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::RepositoryResult;
use crate::models::{Break, BreakId, BreakView, NewBreak};

#[async_trait]
pub trait BreakRepository: Send + Sync {
    /// Record a break and mark the owner unavailable.
    ///
    /// In one atomic step: inserts the break, then sets `is_available = false`
    /// on every schedule of the same user whose `end_time > now`.
    async fn start_break(&self, new_break: &NewBreak, now: DateTime<Utc>)
        -> RepositoryResult<Break>;

    /// All breaks joined with their owners, ordered by start time.
    async fn list_breaks(&self) -> RepositoryResult<Vec<BreakView>>;

    /// Breaks with `end_time > now`.
    async fn list_active_breaks(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<BreakView>>;

    /// Delete a break, or `NotFound`.
    async fn delete_break(&self, break_id: BreakId) -> RepositoryResult<()>;
}
