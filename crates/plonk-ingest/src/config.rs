//! Daemon configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use crate::shorturl::AllocatorConfig;
use crate::{Error, Result};

/// Ingestion daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite cache path, or `:memory:`.
    pub db_path: PathBuf,

    /// Short URL allocator tuning.
    pub allocator: AllocatorConfig,

    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional:
    /// - `PLONK_DB_PATH`: SQLite file (default: `:memory:`)
    /// - `PLONK_SHORT_URL_MIN_LENGTH`: first short URL length (default: 2)
    /// - `PLONK_SHORT_URL_MAX_LENGTH`: longest short URL (default: 16)
    /// - `PLONK_SHORT_URL_MAX_COLLISIONS`: collisions before growing (default: 8)
    /// - `PLONK_METRICS_PORT`: Prometheus port, 0 to disable (default: 0)
    pub fn from_env() -> Result<Self> {
        let defaults = AllocatorConfig::default();

        let db_path = std::env::var("PLONK_DB_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| ":memory:".to_string());

        let allocator = AllocatorConfig {
            min_length: parse_var("PLONK_SHORT_URL_MIN_LENGTH", defaults.min_length)?,
            max_length: parse_var("PLONK_SHORT_URL_MAX_LENGTH", defaults.max_length)?,
            max_collisions: parse_var("PLONK_SHORT_URL_MAX_COLLISIONS", defaults.max_collisions)?,
            ..defaults
        };

        if allocator.min_length == 0 || allocator.min_length > allocator.max_length {
            return Err(Error::Config(format!(
                "short URL lengths must satisfy 1 <= min ({}) <= max ({})",
                allocator.min_length, allocator.max_length
            )));
        }
        if allocator.max_collisions == 0 {
            return Err(Error::Config(
                "PLONK_SHORT_URL_MAX_COLLISIONS must be at least 1".to_string(),
            ));
        }

        let metrics_port: u16 = parse_var("PLONK_METRICS_PORT", 0)?;

        tracing::info!(
            db_path = %db_path,
            min_length = allocator.min_length,
            max_length = allocator.max_length,
            max_collisions = allocator.max_collisions,
            metrics_port,
            "ingest configuration loaded"
        );

        Ok(Self {
            db_path: PathBuf::from(db_path),
            allocator,
            metrics_port,
        })
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}"))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize config tests that manipulate env vars.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "PLONK_DB_PATH",
        "PLONK_SHORT_URL_MIN_LENGTH",
        "PLONK_SHORT_URL_MAX_LENGTH",
        "PLONK_SHORT_URL_MAX_COLLISIONS",
        "PLONK_METRICS_PORT",
    ];

    /// Run `f` with only `vars` set among the config keys.
    fn with_env_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

        let saved: Vec<_> = ENV_KEYS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        // SAFETY: Serialized by mutex; only test code touches these vars.
        unsafe {
            for k in ENV_KEYS {
                std::env::remove_var(k);
            }
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
        }

        f();

        // SAFETY: Restoring original env state.
        unsafe {
            for (k, v) in &saved {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn config_defaults() {
        with_env_vars(&[], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.db_path, PathBuf::from(":memory:"));
            assert_eq!(config.allocator.min_length, 2);
            assert_eq!(config.allocator.max_length, 16);
            assert_eq!(config.allocator.max_collisions, 8);
            assert_eq!(config.allocator.max_insert_attempts, 16);
            assert_eq!(config.metrics_port, 0);
        });
    }

    #[test]
    fn config_custom_values() {
        with_env_vars(
            &[
                ("PLONK_DB_PATH", "/var/lib/plonk/cache.db"),
                ("PLONK_SHORT_URL_MIN_LENGTH", "4"),
                ("PLONK_SHORT_URL_MAX_LENGTH", " 10 "),
                ("PLONK_SHORT_URL_MAX_COLLISIONS", "3"),
                ("PLONK_METRICS_PORT", "9091"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.db_path, PathBuf::from("/var/lib/plonk/cache.db"));
                assert_eq!(config.allocator.min_length, 4);
                assert_eq!(config.allocator.max_length, 10);
                assert_eq!(config.allocator.max_collisions, 3);
                assert_eq!(config.metrics_port, 9091);
            },
        );
    }

    #[test]
    fn config_empty_values_use_defaults() {
        with_env_vars(&[("PLONK_DB_PATH", ""), ("PLONK_METRICS_PORT", "")], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.db_path, PathBuf::from(":memory:"));
            assert_eq!(config.metrics_port, 0);
        });
    }

    #[test]
    fn config_rejects_unparseable_number() {
        with_env_vars(&[("PLONK_METRICS_PORT", "ninety")], || {
            let err = Config::from_env().unwrap_err();
            assert!(matches!(err, Error::Config(_)));
            assert!(err.to_string().contains("PLONK_METRICS_PORT"));
        });
    }

    #[test]
    fn config_rejects_inverted_lengths() {
        with_env_vars(
            &[
                ("PLONK_SHORT_URL_MIN_LENGTH", "8"),
                ("PLONK_SHORT_URL_MAX_LENGTH", "4"),
            ],
            || {
                assert!(matches!(Config::from_env(), Err(Error::Config(_))));
            },
        );
    }

    #[test]
    fn config_rejects_zero_collisions() {
        with_env_vars(&[("PLONK_SHORT_URL_MAX_COLLISIONS", "0")], || {
            assert!(Config::from_env().is_err());
        });
    }
}
