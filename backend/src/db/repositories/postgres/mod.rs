//! Postgres repository implementation using Diesel.
//!
//! ## Features
//!
//! - Connection pooling with r2d2
//! - Automatic retry for transient failures on request-path operations
//! - Single-attempt, single-transaction availability reconciliation
//! - Automatic migration execution
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL` or `PG_DATABASE_URL`: Connection string (required)
//! - `PG_POOL_MAX`: Maximum pool size (default: 10)
//! - `PG_POOL_MIN`: Minimum pool size (default: 1)
//! - `PG_CONN_TIMEOUT_SEC`: Connection timeout in seconds (default: 30)
//! - `PG_IDLE_TIMEOUT_SEC`: Idle connection timeout in seconds (default: 600)
//! - `PG_MAX_RETRIES`: Maximum retry attempts for transient failures (default: 3)
//! - `PG_RETRY_DELAY_MS`: Initial retry delay in milliseconds (default: 100)
//!
//! ## Time
//!
//! Every time comparison binds the caller's `now`. `NOW()` is never used, so
//! the application clock is the only source of current time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_query;
use diesel::sql_types::Timestamptz;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::time::Duration;
use tokio::task;
use tracing::debug;

use crate::db::repository::{
    BreakRepository, ErrorContext, ReconcileOutcome, ReconciliationRepository, RepositoryError,
    RepositoryResult, ScheduleRepository, UserRepository,
};
use crate::models::{
    Break, BreakId, BreakView, NewBreak, NewSchedule, NewUser, Schedule, ScheduleId,
    ScheduleView, User, UserId,
};

mod models;
mod schema;

use models::*;
use schema::*;

type PgPool = Pool<ConnectionManager<PgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("src/db/repositories/postgres/migrations");

/// Transition 2: a schedule becomes available again once any break of the
/// same user has ended, as long as the schedule itself has not ended.
const RESUME_AFTER_BREAK_SQL: &str = "\
    UPDATE schedules AS s \
    SET is_available = TRUE \
    FROM breaks AS b \
    WHERE b.user_id = s.user_id \
      AND b.end_time < $1 \
      AND s.end_time > $1 \
      AND s.is_available = FALSE";

/// Configuration for connecting to Postgres.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_pool_size: u32,
    /// Minimum number of connections in the pool
    pub min_pool_size: u32,
    /// Connection timeout in seconds
    pub connection_timeout_sec: u64,
    /// Idle connection timeout in seconds
    pub idle_timeout_sec: u64,
    /// Maximum number of retry attempts for transient failures
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (doubles with each retry)
    pub retry_delay_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_pool_size: 10,
            min_pool_size: 1,
            connection_timeout_sec: 30,
            idle_timeout_sec: 600,
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl PostgresConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("PG_DATABASE_URL"))
            .map_err(|_| "DATABASE_URL or PG_DATABASE_URL must be set".to_string())?;
        let defaults = Self::default();

        Ok(Self {
            database_url,
            max_pool_size: env_or("PG_POOL_MAX", defaults.max_pool_size),
            min_pool_size: env_or("PG_POOL_MIN", defaults.min_pool_size),
            connection_timeout_sec: env_or("PG_CONN_TIMEOUT_SEC", defaults.connection_timeout_sec),
            idle_timeout_sec: env_or("PG_IDLE_TIMEOUT_SEC", defaults.idle_timeout_sec),
            max_retries: env_or("PG_MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: env_or("PG_RETRY_DELAY_MS", defaults.retry_delay_ms),
        })
    }

    /// Create a new configuration with a database URL.
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }
}

/// Diesel-backed repository for Postgres.
#[derive(Clone, Debug)]
pub struct PostgresRepository {
    pool: PgPool,
    config: PostgresConfig,
}

impl PostgresRepository {
    /// Create a new repository and run pending migrations.
    pub fn new(config: PostgresConfig) -> RepositoryResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&config.database_url);

        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .min_idle(Some(config.min_pool_size))
            .connection_timeout(Duration::from_secs(config.connection_timeout_sec))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_sec)))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("create_pool")
                        .with_details(format!("max_size={}", config.max_pool_size)),
                )
            })?;

        {
            let mut conn = pool.get().map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("get_connection_for_migrations"),
                )
            })?;
            Self::run_migrations(&mut conn)?;
        }

        Ok(Self { pool, config })
    }

    fn run_migrations(conn: &mut PgConnection) -> RepositoryResult<()> {
        conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Migration failed: {}", e),
                ErrorContext::new("run_migrations"),
            )
        })?;
        Ok(())
    }

    /// Execute a database operation with automatic retry for transient failures.
    async fn with_conn<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> RepositoryResult<T> + Send + 'static + Clone,
    {
        self.with_conn_attempts(self.config.max_retries, f).await
    }

    /// Execute a database operation on one pooled connection, retrying up to
    /// `max_retries` times with exponential backoff. The connection returns to
    /// the pool when the attempt finishes, successful or not.
    async fn with_conn_attempts<T, F>(&self, max_retries: u32, f: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> RepositoryResult<T> + Send + 'static + Clone,
    {
        let pool = self.pool.clone();
        let retry_delay_ms = self.config.retry_delay_ms;

        task::spawn_blocking(move || {
            let mut last_error = None;
            let mut retry_delay = Duration::from_millis(retry_delay_ms);

            for attempt in 0..=max_retries {
                if attempt > 0 {
                    debug!(attempt, "retrying database operation");
                    std::thread::sleep(retry_delay);
                    retry_delay *= 2;
                }

                let mut conn = match pool.get() {
                    Ok(c) => c,
                    Err(e) => {
                        let err = RepositoryError::connection_with_context(
                            e.to_string(),
                            ErrorContext::new("get_connection")
                                .with_details(format!("attempt={}", attempt + 1)),
                        );
                        if attempt < max_retries {
                            last_error = Some(err);
                            continue;
                        }
                        return Err(err);
                    }
                };

                match f.clone()(&mut conn) {
                    Ok(result) => return Ok(result),
                    Err(e) if e.is_retryable() && attempt < max_retries => {
                        last_error = Some(e);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            Err(last_error.unwrap_or_else(|| {
                RepositoryError::internal("Max retries exceeded with no error captured")
            }))
        })
        .await
        .map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Task join error: {}", e),
                ErrorContext::new("spawn_blocking"),
            )
        })?
    }

    /// Delete every row from the roster tables. Intended for test databases.
    pub fn truncate_all(&self) -> RepositoryResult<()> {
        let mut conn = self.pool.get()?;
        sql_query("TRUNCATE breaks, schedules, users RESTART IDENTITY CASCADE")
            .execute(&mut conn)?;
        Ok(())
    }

}

fn not_found(entity: &str, id: impl ToString, operation: &str) -> RepositoryError {
    let id = id.to_string();
    RepositoryError::not_found_with_context(
        format!("{} {} not found", entity, id),
        ErrorContext::new(operation)
            .with_entity(entity.to_lowercase())
            .with_entity_id(id),
    )
}

#[async_trait]
impl UserRepository for PostgresRepository {
    async fn create_user(&self, user: &NewUser) -> RepositoryResult<User> {
        let row = NewUserRow::from(user);
        self.with_conn(move |conn| {
            diesel::insert_into(users::table)
                .values(&row)
                .returning(UserRow::as_returning())
                .get_result(conn)
                .map_err(|e| RepositoryError::from(e).with_operation("create_user"))?
                .into_user()
        })
        .await
    }

    async fn get_user(&self, user_id: UserId) -> RepositoryResult<User> {
        self.with_conn(move |conn| {
            users::table
                .find(user_id.value())
                .select(UserRow::as_select())
                .first(conn)
                .optional()?
                .ok_or_else(|| not_found("User", user_id, "get_user"))?
                .into_user()
        })
        .await
    }

    async fn find_user_by_username(&self, username: &str) -> RepositoryResult<Option<User>> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            users::table
                .filter(users::username.eq(&username))
                .select(UserRow::as_select())
                .first(conn)
                .optional()?
                .map(UserRow::into_user)
                .transpose()
        })
        .await
    }

    async fn find_user_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> RepositoryResult<Option<User>> {
        let username = username.to_string();
        let password = password.to_string();
        self.with_conn(move |conn| {
            users::table
                .filter(users::username.eq(&username))
                .filter(users::password.eq(&password))
                .select(UserRow::as_select())
                .first(conn)
                .optional()?
                .map(UserRow::into_user)
                .transpose()
        })
        .await
    }

    async fn list_users(&self) -> RepositoryResult<Vec<User>> {
        self.with_conn(|conn| {
            users::table
                .order(users::id)
                .select(UserRow::as_select())
                .load(conn)?
                .into_iter()
                .map(UserRow::into_user)
                .collect()
        })
        .await
    }
}

#[async_trait]
impl ScheduleRepository for PostgresRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        self.with_conn(|conn| {
            sql_query("SELECT 1").execute(conn)?;
            Ok(true)
        })
        .await
    }

    async fn create_schedule(&self, schedule: &NewSchedule) -> RepositoryResult<Schedule> {
        let row = NewScheduleRow::from(schedule);
        self.with_conn(move |conn| {
            let stored = diesel::insert_into(schedules::table)
                .values(&row)
                .returning(ScheduleRow::as_returning())
                .get_result(conn)
                .map_err(|e| RepositoryError::from(e).with_operation("create_schedule"))?;
            Ok(stored.into())
        })
        .await
    }

    async fn get_schedule(&self, schedule_id: ScheduleId) -> RepositoryResult<Schedule> {
        self.with_conn(move |conn| {
            schedules::table
                .find(schedule_id.value())
                .select(ScheduleRow::as_select())
                .first(conn)
                .optional()?
                .map(Schedule::from)
                .ok_or_else(|| not_found("Schedule", schedule_id, "get_schedule"))
        })
        .await
    }

    async fn list_schedules(&self) -> RepositoryResult<Vec<ScheduleView>> {
        self.with_conn(|conn| {
            schedules::table
                .inner_join(users::table)
                .order((schedules::start_time, schedules::id))
                .select((ScheduleRow::as_select(), UserRow::as_select()))
                .load::<(ScheduleRow, UserRow)>(conn)?
                .into_iter()
                .map(|(row, owner)| schedule_view(row, owner))
                .collect()
        })
        .await
    }

    async fn list_available_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<ScheduleView>> {
        self.with_conn(move |conn| {
            schedules::table
                .inner_join(users::table)
                .filter(schedules::end_time.gt(now))
                .filter(schedules::is_available.eq(true))
                .order((schedules::start_time, schedules::id))
                .select((ScheduleRow::as_select(), UserRow::as_select()))
                .load::<(ScheduleRow, UserRow)>(conn)?
                .into_iter()
                .map(|(row, owner)| schedule_view(row, owner))
                .collect()
        })
        .await
    }

    async fn set_schedule_availability(
        &self,
        schedule_id: ScheduleId,
        is_available: bool,
    ) -> RepositoryResult<Schedule> {
        self.with_conn(move |conn| {
            diesel::update(schedules::table.find(schedule_id.value()))
                .set(schedules::is_available.eq(is_available))
                .returning(ScheduleRow::as_returning())
                .get_result(conn)
                .optional()?
                .map(Schedule::from)
                .ok_or_else(|| not_found("Schedule", schedule_id, "set_schedule_availability"))
        })
        .await
    }

    async fn delete_schedule(&self, schedule_id: ScheduleId) -> RepositoryResult<()> {
        self.with_conn(move |conn| {
            let deleted =
                diesel::delete(schedules::table.find(schedule_id.value())).execute(conn)?;
            if deleted == 0 {
                return Err(not_found("Schedule", schedule_id, "delete_schedule"));
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl BreakRepository for PostgresRepository {
    async fn start_break(
        &self,
        new_break: &NewBreak,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Break> {
        let row = NewBreakRow::from(new_break);
        self.with_conn(move |conn| {
            conn.transaction::<_, RepositoryError, _>(|conn| {
                let stored = diesel::insert_into(breaks::table)
                    .values(&row)
                    .returning(BreakRow::as_returning())
                    .get_result(conn)
                    .map_err(|e| RepositoryError::from(e).with_operation("start_break"))?;

                diesel::update(
                    schedules::table
                        .filter(schedules::user_id.eq(row.user_id))
                        .filter(schedules::end_time.gt(now)),
                )
                .set(schedules::is_available.eq(false))
                .execute(conn)?;

                Ok(stored.into())
            })
        })
        .await
    }

    async fn list_breaks(&self) -> RepositoryResult<Vec<BreakView>> {
        self.with_conn(|conn| {
            breaks::table
                .inner_join(users::table)
                .order((breaks::start_time, breaks::id))
                .select((BreakRow::as_select(), UserRow::as_select()))
                .load::<(BreakRow, UserRow)>(conn)?
                .into_iter()
                .map(|(row, owner)| break_view(row, owner))
                .collect()
        })
        .await
    }

    async fn list_active_breaks(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<BreakView>> {
        self.with_conn(move |conn| {
            breaks::table
                .inner_join(users::table)
                .filter(breaks::end_time.gt(now))
                .order((breaks::start_time, breaks::id))
                .select((BreakRow::as_select(), UserRow::as_select()))
                .load::<(BreakRow, UserRow)>(conn)?
                .into_iter()
                .map(|(row, owner)| break_view(row, owner))
                .collect()
        })
        .await
    }

    async fn delete_break(&self, break_id: BreakId) -> RepositoryResult<()> {
        self.with_conn(move |conn| {
            let deleted = diesel::delete(breaks::table.find(break_id.value())).execute(conn)?;
            if deleted == 0 {
                return Err(not_found("Break", break_id, "delete_break"));
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ReconciliationRepository for PostgresRepository {
    async fn reconcile_availability(
        &self,
        now: DateTime<Utc>,
    ) -> RepositoryResult<ReconcileOutcome> {
        // A failed tick is simply retried by the next tick.
        self.with_conn_attempts(0, move |conn| {
            conn.transaction::<_, RepositoryError, _>(|conn| {
                let expired = diesel::update(
                    schedules::table
                        .filter(schedules::end_time.lt(now))
                        .filter(schedules::is_available.eq(true)),
                )
                .set(schedules::is_available.eq(false))
                .execute(conn)?;

                let resumed = sql_query(RESUME_AFTER_BREAK_SQL)
                    .bind::<Timestamptz, _>(now)
                    .execute(conn)?;

                Ok(ReconcileOutcome { expired, resumed })
            })
            .map_err(|e| e.with_operation("reconcile_availability"))
        })
        .await
    }
}
