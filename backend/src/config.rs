//! Environment-driven configuration.
//!
//! | Variable                      | Default             |
//! |-------------------------------|---------------------|
//! | `ROSTERLOAD_PORT`             | `3000`              |
//! | `ROSTERLOAD_STORE_DIR`        | `.rosterload/store` |
//! | `ROSTERLOAD_MATCH_STRATEGY`   | `fuzzy`             |
//! | `ROSTERLOAD_MAX_UPLOAD_BYTES` | `52428800` (50 MiB) |
//! | `ROSTERLOAD_SESSION_TTL_SECS` | `3600`              |
//!
//! A `.env` file in the working directory is loaded first when present.
//! CLI flags override whatever is read here.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::dedup::MatchStrategy;
use crate::error::ConfigError;
use crate::store::file::DEFAULT_STORE_DIR;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
/// Unconfirmed server sessions older than this are dropped.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub port: u16,
    pub store_dir: PathBuf,
    pub match_strategy: MatchStrategy,
    pub max_upload_bytes: usize,
    pub session_ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            match_strategy: MatchStrategy::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }
}

impl AppConfig {
    /// Read the process environment (after loading `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            port: parse_var(&lookup, "ROSTERLOAD_PORT")?.unwrap_or(defaults.port),
            store_dir: lookup("ROSTERLOAD_STORE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.store_dir),
            match_strategy: parse_var(&lookup, "ROSTERLOAD_MATCH_STRATEGY")?
                .unwrap_or(defaults.match_strategy),
            max_upload_bytes: parse_var(&lookup, "ROSTERLOAD_MAX_UPLOAD_BYTES")?
                .unwrap_or(defaults.max_upload_bytes),
            session_ttl_secs: parse_var(&lookup, "ROSTERLOAD_SESSION_TTL_SECS")?
                .unwrap_or(defaults.session_ttl_secs),
        })
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError {
                var,
                value: value.clone(),
                reason: e.to_string(),
            }),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.match_strategy, MatchStrategy::Fuzzy);
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("ROSTERLOAD_PORT", "8080"),
            ("ROSTERLOAD_STORE_DIR", "/var/lib/rosterload"),
            ("ROSTERLOAD_MATCH_STRATEGY", "exact"),
            ("ROSTERLOAD_MAX_UPLOAD_BYTES", "1024"),
            ("ROSTERLOAD_SESSION_TTL_SECS", "600"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.store_dir, PathBuf::from("/var/lib/rosterload"));
        assert_eq!(config.match_strategy, MatchStrategy::Exact);
        assert_eq!(config.max_upload_bytes, 1024);
        assert_eq!(config.session_ttl_secs, 600);
    }

    #[test]
    fn test_invalid_value_names_the_variable() {
        let err = AppConfig::from_lookup(lookup(&[("ROSTERLOAD_MATCH_STRATEGY", "loose")])).unwrap_err();
        assert_eq!(err.var, "ROSTERLOAD_MATCH_STRATEGY");
        assert!(err.to_string().contains("loose"));

        assert!(AppConfig::from_lookup(lookup(&[("ROSTERLOAD_PORT", "http")])).is_err());
    }
}
