//! Server configuration from environment variables

use crate::types::AccessLevel;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Batch window for voted-summary broadcasts
    pub voted_debounce: Duration,
    /// Level granted to callers the resolver has no entry for
    pub default_access: AccessLevel,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 6810,
            voted_debounce: Duration::from_millis(500),
            default_access: AccessLevel::ReadOnly,
        }
    }
}

impl ServerConfig {
    /// Load config from QUORUM_PORT, QUORUM_VOTED_DEBOUNCE_MS and
    /// QUORUM_DEFAULT_ACCESS; unset or invalid values fall back to
    /// defaults with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = match std::env::var("QUORUM_PORT") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!("invalid QUORUM_PORT {raw:?}, using {}", defaults.port);
                defaults.port
            }),
            Err(_) => defaults.port,
        };

        let voted_debounce = match std::env::var("QUORUM_VOTED_DEBOUNCE_MS") {
            Ok(raw) => raw.parse().map(Duration::from_millis).unwrap_or_else(|_| {
                tracing::warn!("invalid QUORUM_VOTED_DEBOUNCE_MS {raw:?}, using 500");
                defaults.voted_debounce
            }),
            Err(_) => defaults.voted_debounce,
        };

        let default_access = match std::env::var("QUORUM_DEFAULT_ACCESS").as_deref() {
            Ok("none") => AccessLevel::None,
            Ok("ro") => AccessLevel::ReadOnly,
            Ok("rw") => AccessLevel::ReadWrite,
            Ok("admin") => AccessLevel::Admin,
            Ok(other) => {
                tracing::warn!("invalid QUORUM_DEFAULT_ACCESS {other:?}, using ro");
                defaults.default_access
            }
            Err(_) => defaults.default_access,
        };

        Self {
            port,
            voted_debounce,
            default_access,
        }
    }
}
