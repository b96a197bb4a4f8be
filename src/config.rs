//! Process-level configuration for the `hub-enginectl`/`hub-engine` binaries.
//!
//! Loaded from environment variables rather than a config file: the
//! runtime itself is configured per-production via
//! [`crate::engine::snapshot::ProductionSnapshot`], handed to
//! [`crate::engine::Engine::deploy`] by whatever surface produces it (the
//! out-of-scope management API, or a file read by the CLI). This struct
//! covers only what the process needs before any production exists: where
//! to persist traces, which address to answer control calls on, and how
//! often the session reconciler runs.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised loading [`EngineConfig`] from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable was set but could not be parsed.
    #[error("invalid value for {var}: {reason}")]
    InvalidValue {
        /// The environment variable name.
        var: &'static str,
        /// Why it failed to parse.
        reason: String,
    },
}

/// Environment-sourced process configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the `SQLite` trace database. `HUB_ENGINE_DB_PATH`, default
    /// `./data/hub-engine.sqlite3`.
    pub db_path: PathBuf,
    /// Address the control-surface HTTP server binds. `HUB_ENGINE_BIND`,
    /// default `127.0.0.1:7650`.
    pub bind_addr: SocketAddr,
    /// How often the session reconciler sweeps for unassigned headers.
    /// `HUB_ENGINE_RECONCILE_INTERVAL_SECS`, default 30.
    pub reconcile_interval: Duration,
    /// Size of each host's fire-and-forget trace-write buffer.
    /// `HUB_ENGINE_TRACE_BUFFER_SIZE`, default 1024.
    pub trace_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/hub-engine.sqlite3"),
            bind_addr: "127.0.0.1:7650".parse().expect("valid default bind address"),
            reconcile_interval: Duration::from_secs(30),
            trace_buffer_size: 1024,
        }
    }
}

impl EngineConfig {
    /// Builds a config from `HUB_ENGINE_*` environment variables, falling
    /// back to [`EngineConfig::default`] for anything unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set but does
    /// not parse as its expected type.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("HUB_ENGINE_DB_PATH") {
            config.db_path = PathBuf::from(value);
        }

        if let Ok(value) = std::env::var("HUB_ENGINE_BIND") {
            config.bind_addr = value.parse().map_err(|err| ConfigError::InvalidValue {
                var: "HUB_ENGINE_BIND",
                reason: format!("{err}"),
            })?;
        }

        if let Ok(value) = std::env::var("HUB_ENGINE_RECONCILE_INTERVAL_SECS") {
            let secs: u64 = value.parse().map_err(|err| ConfigError::InvalidValue {
                var: "HUB_ENGINE_RECONCILE_INTERVAL_SECS",
                reason: format!("{err}"),
            })?;
            config.reconcile_interval = Duration::from_secs(secs);
        }

        if let Ok(value) = std::env::var("HUB_ENGINE_TRACE_BUFFER_SIZE") {
            config.trace_buffer_size = value.parse().map_err(|err| ConfigError::InvalidValue {
                var: "HUB_ENGINE_TRACE_BUFFER_SIZE",
                reason: format!("{err}"),
            })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_localhost() {
        let config = EngineConfig::default();
        assert_eq!(config.bind_addr.ip().to_string(), "127.0.0.1");
        assert_eq!(config.reconcile_interval, Duration::from_secs(30));
    }

    #[test]
    fn from_env_rejects_unparseable_bind_address() {
        // SAFETY-equivalent: tests run single-threaded within this module's
        // env mutation; no other test in this file reads HUB_ENGINE_BIND.
        unsafe {
            std::env::set_var("HUB_ENGINE_BIND", "not-an-address");
        }
        let result = EngineConfig::from_env();
        unsafe {
            std::env::remove_var("HUB_ENGINE_BIND");
        }
        assert!(matches!(result, Err(ConfigError::InvalidValue { var: "HUB_ENGINE_BIND", .. })));
    }
}
