// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use synckit_core::config::parse_var;
use synckit_core::{ConfigError, ExecutorConfig};

/// synckit server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// JSON file holding the table descriptors
    pub tables_file: PathBuf,
    /// Maximum pool connections
    pub db_max_connections: u32,
    /// Bound on draining the executor at shutdown
    pub shutdown_timeout: Duration,
    pub executor: ExecutorConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `SYNCKIT_DATABASE_URL`: PostgreSQL connection string
    /// - `SYNCKIT_TABLES_FILE`: path to the JSON array of table descriptors
    ///
    /// Optional (with defaults):
    /// - `SYNCKIT_HTTP_PORT`: HTTP port (default: 8080)
    /// - `SYNCKIT_DB_MAX_CONNECTIONS`: pool size (default: 10)
    /// - `SYNCKIT_SHUTDOWN_TIMEOUT_SECS`: executor drain bound (default: 30)
    /// - `SYNCKIT_EXECUTOR_*`: see [`ExecutorConfig::from_env`]
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("SYNCKIT_DATABASE_URL")?;
        let tables_file = PathBuf::from(required("SYNCKIT_TABLES_FILE")?);

        let http_port: u16 = parse_var("SYNCKIT_HTTP_PORT", 8080, "must be a valid port number")?;
        let db_max_connections: u32 =
            parse_var("SYNCKIT_DB_MAX_CONNECTIONS", 10, "must be a positive integer")?;
        if db_max_connections == 0 {
            return Err(ConfigError::Invalid(
                "SYNCKIT_DB_MAX_CONNECTIONS",
                "must be a positive integer",
            ));
        }
        let shutdown_secs: u64 = parse_var(
            "SYNCKIT_SHUTDOWN_TIMEOUT_SECS",
            30,
            "must be a non-negative integer",
        )?;

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            tables_file,
            db_max_connections,
            shutdown_timeout: Duration::from_secs(shutdown_secs),
            executor: ExecutorConfig::from_env()?,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}
