//! Server configuration assembled from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `HOST` | `0.0.0.0` |
//! | `PORT` | `8080` |
//! | `ROSTER_TIMEZONE` | `Asia/Kolkata` |
//! | `ROSTER_CONFIG` | unset; falls back to a `repository.toml` in a standard location |
//! | `RECONCILE_INTERVAL_SECS` | `60` |
//! | `RECONCILE_TIMEOUT_SECS` | `30` |
//! | `RECONCILE_ON_START` | `false` |
//! | `SESSION_TTL_MINS` | `720` |

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::models::{CivilClock, DEFAULT_TIMEZONE};
use crate::services::{ReconcilerConfig, DEFAULT_SESSION_TTL_MINS};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

impl ConfigError {
    fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            name,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub timezone: String,
    /// Explicit `repository.toml` path from `ROSTER_CONFIG`.
    pub repository_config: Option<PathBuf>,
    pub reconciler: ReconcilerConfig,
    /// How long a login stays valid.
    pub session_ttl: chrono::Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timezone: DEFAULT_TIMEZONE.to_string(),
            repository_config: None,
            reconciler: ReconcilerConfig::default(),
            session_ttl: chrono::Duration::minutes(DEFAULT_SESSION_TTL_MINS),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("PORT", format!("'{}' is not a port", port)))?;
        }
        if let Ok(tz) = env::var("ROSTER_TIMEZONE") {
            config.timezone = tz;
        }
        config.repository_config = env::var("ROSTER_CONFIG").ok().map(PathBuf::from);
        config.reconciler = ReconcilerConfig::from_env()
            .map_err(|e| ConfigError::invalid("reconciler settings", e))?;
        if let Ok(raw) = env::var("SESSION_TTL_MINS") {
            let mins: i64 = raw
                .trim()
                .parse()
                .ok()
                .filter(|m| *m > 0)
                .ok_or_else(|| {
                    ConfigError::invalid(
                        "SESSION_TTL_MINS",
                        format!("'{}' is not a positive number of minutes", raw),
                    )
                })?;
            config.session_ttl = chrono::Duration::minutes(mins);
        }

        // Fail early on a bad timezone rather than at the first request.
        config.clock()?;
        Ok(config)
    }

    pub fn clock(&self) -> Result<CivilClock, ConfigError> {
        CivilClock::from_name(&self.timezone).map_err(|e| ConfigError::invalid("ROSTER_TIMEZONE", e))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::invalid("HOST", format!("{}", e)))
    }
}
