//! Service layer between the HTTP handlers and the repositories.
//!
//! - [`roster`]: user-facing roster operations with role checks
//! - [`session`]: bearer-token sessions
//! - [`reconciler`]: the background availability job

pub mod reconciler;
pub mod roster;
pub mod session;

pub use reconciler::{
    ReconcileReport, Reconciler, ReconcilerConfig, ReconcilerHandle, ReconcilerStats, TickError,
};
pub use roster::{
    Actor, AdminOverview, Dashboard, RosterError, RosterResult, RosterService, MAX_BREAK_MINUTES,
};
pub use session::{Session, SessionStore, DEFAULT_SESSION_TTL_MINS};
