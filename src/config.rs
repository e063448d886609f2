// src/config.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::{DbError, Result as DbResult};

pub const DEFAULT_DB_FILE: &str = "saved_scripts.db";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_NOTIFY_CAPACITY: usize = 256;

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    Memory,
    File(PathBuf),
}

impl DbLocation {
    /// `":memory:"` selects an in-memory database, anything else is a path.
    pub fn from_path_str(path: &str) -> Self {
        if path == ":memory:" {
            DbLocation::Memory
        } else {
            DbLocation::File(PathBuf::from(path))
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub location: DbLocation,
    /// How long a statement waits on a locked database file.
    pub busy_timeout: Duration,
    /// Buffered invalidations per live list before it is considered lagging.
    pub notify_capacity: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            location: DbLocation::File(PathBuf::from(DEFAULT_DB_FILE)),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            notify_capacity: DEFAULT_NOTIFY_CAPACITY,
        }
    }
}

impl DbConfig {
    pub fn in_memory() -> Self {
        Self {
            location: DbLocation::Memory,
            ..Self::default()
        }
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            location: DbLocation::File(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default            |
    /// |------------------------------|--------------------|
    /// | `SCRIPTS_DB_PATH`            | `saved_scripts.db` |
    /// | `SCRIPTS_DB_BUSY_TIMEOUT_MS` | `5000`             |
    /// | `SCRIPTS_DB_NOTIFY_CAPACITY` | `256`              |
    pub fn from_env() -> DbResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> DbResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("SCRIPTS_DB_PATH") {
            config.location = DbLocation::from_path_str(path.trim());
        }

        if let Some(raw) = lookup("SCRIPTS_DB_BUSY_TIMEOUT_MS") {
            let ms: u64 = raw.trim().parse().map_err(|_| {
                DbError::Config(format!("SCRIPTS_DB_BUSY_TIMEOUT_MS must be a valid u64, got {raw:?}"))
            })?;
            config.busy_timeout = Duration::from_millis(ms);
        }

        if let Some(raw) = lookup("SCRIPTS_DB_NOTIFY_CAPACITY") {
            let capacity: usize = raw.trim().parse().map_err(|_| {
                DbError::Config(format!("SCRIPTS_DB_NOTIFY_CAPACITY must be a valid usize, got {raw:?}"))
            })?;
            if capacity == 0 {
                return Err(DbError::Config("SCRIPTS_DB_NOTIFY_CAPACITY must be > 0".into()));
            }
            config.notify_capacity = capacity;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = DbConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.location, DbLocation::File(PathBuf::from(DEFAULT_DB_FILE)));
        assert_eq!(config.busy_timeout, Duration::from_millis(5_000));
        assert_eq!(config.notify_capacity, 256);
    }

    #[test]
    fn test_env_overrides() {
        let config = DbConfig::from_lookup(lookup(&[
            ("SCRIPTS_DB_PATH", ":memory:"),
            ("SCRIPTS_DB_BUSY_TIMEOUT_MS", "250"),
            ("SCRIPTS_DB_NOTIFY_CAPACITY", "8"),
        ]))
        .unwrap();
        assert_eq!(config.location, DbLocation::Memory);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.notify_capacity, 8);
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        let err = DbConfig::from_lookup(lookup(&[("SCRIPTS_DB_BUSY_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, DbError::Config(_)));

        let err = DbConfig::from_lookup(lookup(&[("SCRIPTS_DB_NOTIFY_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }
}
