//! Opens the roster store the server runs against.
//!
//! Settings come from a `repository.toml` when one is found (it may also list
//! seed accounts), otherwise from `REPOSITORY_TYPE` and `DATABASE_URL`. Either
//! way the caller gets a ready `Arc<dyn FullRepository>` with its seed
//! accounts created.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use super::repo_config::RepositoryConfig;
use super::repositories::LocalRepository;
#[cfg(feature = "postgres-repo")]
use super::repositories::PostgresRepository;
use super::repository::{FullRepository, RepositoryError, RepositoryResult};
use super::services::seed_users;
use super::PostgresConfig;

/// Which backend holds the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryType {
    /// Postgres + Diesel implementation
    Postgres,
    /// In-memory local repository
    Local,
}

impl FromStr for RepositoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "local" | "memory" => Ok(Self::Local),
            _ => Err(format!(
                "Unknown repository type '{}' (expected 'local' or 'postgres')",
                s
            )),
        }
    }
}

impl RepositoryType {
    /// Backend named by `REPOSITORY_TYPE`.
    ///
    /// Without it, Postgres is chosen when a database URL is present and the
    /// in-memory store otherwise. A value that names no backend is an error.
    pub fn from_env() -> Result<Self, String> {
        if let Ok(val) = std::env::var("REPOSITORY_TYPE") {
            return val
                .parse()
                .map_err(|e| format!("REPOSITORY_TYPE: {}", e));
        }

        if std::env::var("DATABASE_URL").is_ok() || std::env::var("PG_DATABASE_URL").is_ok() {
            Ok(Self::Postgres)
        } else {
            Ok(Self::Local)
        }
    }
}

fn postgres_disabled() -> RepositoryError {
    RepositoryError::configuration("Postgres repository feature not enabled")
}

#[cfg(feature = "postgres-repo")]
fn postgres_config_from_env() -> RepositoryResult<PostgresConfig> {
    PostgresConfig::from_env().map_err(RepositoryError::configuration)
}

#[cfg(not(feature = "postgres-repo"))]
fn postgres_config_from_env() -> RepositoryResult<PostgresConfig> {
    Err(postgres_disabled())
}

/// Connect and run pending migrations off the async runtime.
#[cfg(feature = "postgres-repo")]
async fn open_postgres(config: PostgresConfig) -> RepositoryResult<Arc<dyn FullRepository>> {
    let repo = tokio::task::spawn_blocking(move || PostgresRepository::new(config))
        .await
        .map_err(|e| RepositoryError::internal(format!("Task join error: {}", e)))??;
    Ok(Arc::new(repo))
}

#[cfg(not(feature = "postgres-repo"))]
async fn open_postgres(_config: PostgresConfig) -> RepositoryResult<Arc<dyn FullRepository>> {
    Err(postgres_disabled())
}

async fn connect(
    repo_type: RepositoryType,
    postgres: impl FnOnce() -> RepositoryResult<PostgresConfig>,
) -> RepositoryResult<Arc<dyn FullRepository>> {
    match repo_type {
        RepositoryType::Local => Ok(Arc::new(LocalRepository::new())),
        RepositoryType::Postgres => open_postgres(postgres()?).await,
    }
}

pub struct RepositoryFactory;

impl RepositoryFactory {
    /// Open the store for the server.
    ///
    /// Reads `explicit` when given, else a `repository.toml` in a standard
    /// location, else the environment. A missing or broken explicit file is an
    /// error; a missing default file is not.
    pub async fn open(explicit: Option<&Path>) -> RepositoryResult<Arc<dyn FullRepository>> {
        let file_config = match explicit {
            Some(path) => Some(RepositoryConfig::from_file(path).map_err(|e| {
                RepositoryError::configuration(format!("{}: {}", path.display(), e))
            })?),
            None => RepositoryConfig::from_default_location().ok(),
        };

        match file_config {
            Some(config) => Self::from_repository_config(&config).await,
            None => {
                warn!("No repository.toml found; using environment settings without seed users");
                Self::from_env().await
            }
        }
    }

    /// Open the store described by a parsed `repository.toml` and create its
    /// `[[users]]` accounts.
    pub async fn from_repository_config(
        config: &RepositoryConfig,
    ) -> RepositoryResult<Arc<dyn FullRepository>> {
        let repo_type = config.repository_type().map_err(|e| {
            RepositoryError::configuration(format!("Invalid repository type: {}", e))
        })?;

        let repository = connect(repo_type, || {
            config.to_postgres_config()?.ok_or_else(|| {
                RepositoryError::configuration("Postgres repository requires database configuration")
            })
        })
        .await?;

        let seeds = config.seed_users();
        let created = seed_users(repository.as_ref(), &seeds).await?;
        info!(backend = ?repo_type, seeds = seeds.len(), created, "Repository ready");
        Ok(repository)
    }

    /// Open the store named by `REPOSITORY_TYPE` / `DATABASE_URL`. No accounts
    /// are seeded.
    pub async fn from_env() -> RepositoryResult<Arc<dyn FullRepository>> {
        let repo_type = RepositoryType::from_env().map_err(RepositoryError::configuration)?;
        let repository = connect(repo_type, postgres_config_from_env).await?;
        info!(backend = ?repo_type, "Repository ready");
        Ok(repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_type_from_str() {
        assert_eq!(
            RepositoryType::from_str("local").unwrap(),
            RepositoryType::Local
        );
        assert_eq!(
            RepositoryType::from_str(" Pg ").unwrap(),
            RepositoryType::Postgres
        );
        assert!(RepositoryType::from_str("mysql").is_err());
    }

    #[tokio::test]
    async fn test_local_config_is_seeded() {
        let config = RepositoryConfig::from_toml_str(
            r#"
[repository]
type = "local"

[[users]]
username = "dr_rao"
password = "pw"
role = "doctor"
"#,
        )
        .unwrap();

        let repo = RepositoryFactory::from_repository_config(&config)
            .await
            .unwrap();
        assert!(repo.find_user_by_username("dr_rao").await.unwrap().is_some());
    }

    #[cfg(not(feature = "postgres-repo"))]
    #[tokio::test]
    async fn test_postgres_requires_feature() {
        let config = RepositoryConfig::from_toml_str("[repository]\ntype = \"postgres\"\n").unwrap();
        let result = RepositoryFactory::from_repository_config(&config).await;
        assert!(matches!(
            result,
            Err(RepositoryError::ConfigurationError { .. })
        ));
    }
}
