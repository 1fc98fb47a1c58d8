// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

/// Convora Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Maximum inbound events dispatched concurrently (advisory; each run is
    /// still single-writer through the version-checked claim)
    pub max_concurrent_dispatches: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `CONVORA_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `CONVORA_MAX_CONCURRENT_DISPATCHES`: Max concurrent dispatches (default: 32)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("CONVORA_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("CONVORA_DATABASE_URL"))?;

        let max_concurrent_dispatches: u32 = std::env::var("CONVORA_MAX_CONCURRENT_DISPATCHES")
            .unwrap_or_else(|_| "32".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "CONVORA_MAX_CONCURRENT_DISPATCHES",
                    "must be a positive integer",
                )
            })?;

        Ok(Self {
            database_url,
            max_concurrent_dispatches,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
