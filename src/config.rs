use crate::{
    model::UserId,
    sqlite::{run_schema, SqliteConfig},
};
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("pool size must be at least 1")]
    EmptyPool,
    #[error("user id must be positive, got {0}")]
    InvalidUser(i64),
}

/// Command line of `greendeer-server`. Every flag can also come from the
/// environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "greendeer-server", version, about = "Run tracking RPC server")]
pub struct ServerConfig {
    /// SQLite database file, or `:memory:` for a throwaway store
    #[arg(long, env = "GREENDEER_DATABASE", default_value = "green-deer.db")]
    pub database: PathBuf,

    /// Address the RPC endpoint listens on
    #[arg(long, env = "GREENDEER_BIND", default_value = "127.0.0.1:50051")]
    pub bind: SocketAddr,

    /// Maximum number of open database connections
    #[arg(long, env = "GREENDEER_POOL_SIZE", default_value_t = 4)]
    pub pool_size: usize,

    /// Default per-request deadline in milliseconds; 0 disables it
    #[arg(long, env = "GREENDEER_REQUEST_TIMEOUT_MS", default_value_t = 5000)]
    pub request_timeout_ms: u64,

    /// How long a connection waits on a locked database, in milliseconds
    #[arg(long, env = "GREENDEER_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,

    /// The single user every request acts on behalf of
    #[arg(long, env = "GREENDEER_USER_ID", default_value_t = 1)]
    pub user_id: i64,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::EmptyPool);
        }
        if self.user_id <= 0 {
            return Err(ConfigError::InvalidUser(self.user_id));
        }
        Ok(())
    }

    pub fn sqlite(&self) -> SqliteConfig {
        SqliteConfig::new(self.database.clone(), run_schema())
            .with_max_connections(self.pool_size)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }

    pub fn user(&self) -> UserId {
        UserId(self.user_id)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}
