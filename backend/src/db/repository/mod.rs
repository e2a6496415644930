//! Repository trait definitions for the roster store.
//!
//! The store is split into focused traits, one per record kind, plus the
//! bulk reconciliation statement used by the background job.
//!
//! # Module Organization
//!
//! - [`error`]: Error types for repository operations
//! - [`user`]: Account lookup and creation
//! - [`schedule`]: Availability windows
//! - [`breaks`]: Timed breaks
//! - [`reconcile`]: The periodic availability rewrite
//!
//! # Convenience Trait Bound
//!
//! Services that need every capability take `&dyn FullRepository` or use it
//! as a generic bound:
//!
//! ```ignore
//! async fn tick<R: FullRepository + ?Sized>(repo: &R, now: DateTime<Utc>) -> RepositoryResult<()> {
//!     repo.reconcile_availability(now).await?;
//!     Ok(())
//! }
//! ```

pub mod breaks;
pub mod error;
pub mod reconcile;
pub mod schedule;
pub mod user;

pub use breaks::BreakRepository;
pub use error::{ErrorContext, RepositoryError, RepositoryResult};
pub use reconcile::{ReconcileOutcome, ReconciliationRepository};
pub use schedule::ScheduleRepository;
pub use user::UserRepository;

/// Composite trait bound for a complete repository implementation.
///
/// Automatically implemented for any type that implements all four
/// repository traits.
pub trait FullRepository:
    UserRepository + ScheduleRepository + BreakRepository + ReconciliationRepository
{
}

impl<T> FullRepository for T where
    T: UserRepository + ScheduleRepository + BreakRepository + ReconciliationRepository
{
}
