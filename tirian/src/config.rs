//! Runtime configuration, loaded from environment variables.
//!
//! | Variable            | Default          | Values                         |
//! |---------------------|------------------|--------------------------------|
//! | `TIRIAN_STORAGE`    | `memory`         | `memory`, `sled`, `postgres`   |
//! | `TIRIAN_SLED_PATH`  | `tirian.sled`    | a directory                    |
//! | `DATABASE_URL`      | unset            | a PostgreSQL URL               |
//! | `TIRIAN_LOG_LEVEL`  | `info`           | an `EnvFilter` directive       |
//! | `TIRIAN_LOG_FORMAT` | `pretty`         | `pretty`, `json`               |
//!
//! `RUST_LOG`, when set, takes precedence over `TIRIAN_LOG_LEVEL`.

use std::{env, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Which [`RecordStore`](crate::RecordStore) backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Process-local; everything is lost on exit.
    #[default]
    Memory,
    /// An embedded `sled` database.
    Sled,
    /// A PostgreSQL database.
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "sled" => Ok(Self::Sled),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(Error::Config(format!("unknown storage backend {other:?}"))),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(Error::Config(format!("unknown log format {other:?}"))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive, e.g. `info` or `tirian=debug`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::default(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// The storage backend.
    pub storage: StorageBackend,
    /// Where the sled database lives.
    pub sled_path: PathBuf,
    /// PostgreSQL connection URL; required for the postgres backend.
    pub database_url: Option<String>,
    /// Logging.
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageBackend::default(),
            sled_path: PathBuf::from("tirian.sled"),
            database_url: None,
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when a variable holds an unsupported value.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let storage = match lookup("TIRIAN_STORAGE") {
            Some(v) => v.parse()?,
            None => defaults.storage,
        };
        let format = match lookup("TIRIAN_LOG_FORMAT") {
            Some(v) => v.parse()?,
            None => defaults.log.format,
        };
        let config = Self {
            storage,
            sled_path: lookup("TIRIAN_SLED_PATH").map_or(defaults.sled_path, PathBuf::from),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            log: LogConfig {
                level: lookup("TIRIAN_LOG_LEVEL").unwrap_or(defaults.log.level),
                format,
            },
        };

        if config.storage == StorageBackend::Postgres && config.database_url.is_none() {
            return Err(Error::Config("DATABASE_URL is required for postgres storage".into()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("TIRIAN_STORAGE", "Postgres"),
            ("DATABASE_URL", "postgres://localhost/tirian"),
            ("TIRIAN_SLED_PATH", "/var/lib/tirian"),
            ("TIRIAN_LOG_LEVEL", "tirian=debug"),
            ("TIRIAN_LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/tirian"));
        assert_eq!(config.sled_path, PathBuf::from("/var/lib/tirian"));
        assert_eq!(config.log.level, "tirian=debug");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn rejects_unknown_values() {
        for vars in [
            [("TIRIAN_STORAGE", "redis")],
            [("TIRIAN_LOG_FORMAT", "xml")],
            [("TIRIAN_STORAGE", "postgres")],
        ] {
            let err = Config::from_lookup(lookup(&vars)).expect_err("invalid");
            assert!(matches!(err, Error::Config(_)), "{vars:?}");
        }
    }
}
