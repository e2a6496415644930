//! Bulk availability rewrite driven by the reconciler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RepositoryResult;

/// Number of flags each transition actually flipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Schedules turned unavailable because `end_time < now`.
    pub expired: usize,
    /// Schedules turned available because a break of the same user ended
    /// before `now` while the schedule has `end_time > now`.
    pub resumed: usize,
}

impl ReconcileOutcome {
    pub fn changed(&self) -> usize {
        self.expired + self.resumed
    }
}

#[async_trait]
pub trait ReconciliationRepository: Send + Sync {
    /// Apply both availability transitions at instant `now`.
    ///
    /// Runs inside a single transaction on one connection:
    ///
    /// 1. every schedule with `end_time < now` becomes unavailable;
    /// 2. every schedule `s` with a break `b` of the same user where
    ///    `b.end_time < now AND s.end_time > now` becomes available.
    ///
    /// Each transition keeps its own time guard, so the result does not
    /// depend on their order.
    async fn reconcile_availability(&self, now: DateTime<Utc>)
        -> RepositoryResult<ReconcileOutcome>;
}
