//! Persistence for users, schedules and breaks.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  HTTP handlers / roster services / reconciler           │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼─────────────────────────────────────┐
//! │  Repository traits (repository/) - Abstract Interface   │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//!     ┌───────────────┴──────────────┐
//!     │                              │
//! ┌───▼──────────────┐     ┌─────────▼──────────┐
//! │ LocalRepository  │     │ PostgresRepository │
//! │   (in-memory)    │     │  (Diesel + r2d2)   │
//! └──────────────────┘     └────────────────────┘
//! ```
//!
//! Repositories are created through [`RepositoryFactory`] and passed around
//! as `Arc<dyn FullRepository>`.

#[cfg(not(any(feature = "postgres-repo", feature = "local-repo")))]
compile_error!("Enable at least one repository backend feature.");

pub mod factory;
pub mod repo_config;
pub mod repositories;
pub mod repository;
pub mod services;

// Postgres config is colocated with the repository implementation.
#[cfg(feature = "postgres-repo")]
pub use repositories::postgres::PostgresConfig;
#[cfg(not(feature = "postgres-repo"))]
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    _private: (),
}

pub use factory::{RepositoryFactory, RepositoryType};
pub use repo_config::{RepositoryConfig, SeedUser};
pub use repositories::LocalRepository;
#[cfg(feature = "postgres-repo")]
pub use repositories::PostgresRepository;
pub use repository::{
    BreakRepository, ErrorContext, FullRepository, ReconcileOutcome, ReconciliationRepository,
    RepositoryError, RepositoryResult, ScheduleRepository, UserRepository,
};
pub use services::{health_check, seed_users};
