//! Process configuration
//!
//! [`Settings`] is built once at startup, from `CHUNKYARD_*` environment
//! variables or explicitly, and handed to the catalog and adapters by `Arc`.

use crate::errors::{ChunkyardError, Result};
use crate::parallel::ParallelConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PREFIX: &str = "CHUNKYARD_";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// SQLite URI of the catalog; `None` keeps the catalog in memory
    pub database_uri: Option<String>,
    pub database_init_if_not_exists: bool,
    pub database_pool_size: u32,
    pub database_acquire_timeout: Duration,
    /// Root under which internally managed storage is allocated
    pub writable_storage: PathBuf,
    pub write_lock_timeout: Duration,
    pub response_bytesize_limit: usize,
    pub parallel: ParallelConfig,
    pub max_concurrent_partitions: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_uri: None,
            database_init_if_not_exists: false,
            database_pool_size: 5,
            database_acquire_timeout: Duration::from_secs(30),
            writable_storage: std::env::temp_dir().join("chunkyard-data"),
            write_lock_timeout: Duration::from_millis(10_000),
            response_bytesize_limit: 300_000_000,
            parallel: ParallelConfig::default(),
            max_concurrent_partitions: num_cpus::get().max(1),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build settings from `(name, value)` pairs; names without the
    /// `CHUNKYARD_` prefix are ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Self::default();
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match name {
                "DATABASE_URI" => settings.database_uri = Some(value.to_string()),
                "DATABASE_INIT_IF_NOT_EXISTS" => {
                    settings.database_init_if_not_exists = parse_flag(name, value)?
                }
                "DATABASE_POOL_SIZE" => settings.database_pool_size = parse(name, value)?,
                "DATABASE_ACQUIRE_TIMEOUT_SECS" => {
                    settings.database_acquire_timeout = Duration::from_secs(parse(name, value)?)
                }
                "WRITABLE_STORAGE" => settings.writable_storage = PathBuf::from(value),
                "WRITE_LOCK_TIMEOUT_MS" => {
                    settings.write_lock_timeout = Duration::from_millis(parse(name, value)?)
                }
                "RESPONSE_BYTESIZE_LIMIT" => {
                    settings.response_bytesize_limit = parse(name, value)?
                }
                "NUM_THREADS" => settings.parallel = ParallelConfig::with_threads(parse(name, value)?),
                "MAX_CONCURRENT_PARTITIONS" => {
                    settings.max_concurrent_partitions = parse(name, value)?
                }
                _ => {}
            }
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_database_uri(mut self, uri: impl Into<String>) -> Self {
        self.database_uri = Some(uri.into());
        self
    }

    pub fn with_writable_storage(mut self, path: impl Into<PathBuf>) -> Self {
        self.writable_storage = path.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_pool_size == 0 {
            return Err(ChunkyardError::validation(
                "CHUNKYARD_DATABASE_POOL_SIZE must be at least 1",
            ));
        }
        if self.max_concurrent_partitions == 0 {
            return Err(ChunkyardError::validation(
                "CHUNKYARD_MAX_CONCURRENT_PARTITIONS must be at least 1",
            ));
        }
        if self.parallel.num_threads == Some(0) {
            return Err(ChunkyardError::validation(
                "CHUNKYARD_NUM_THREADS must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn is_in_memory(&self) -> bool {
        match &self.database_uri {
            None => true,
            Some(uri) => uri.contains(":memory:") || uri.contains("mode=memory"),
        }
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ChunkyardError::validation(format!("{}{}: invalid value '{}'", ENV_PREFIX, name, value))
    })
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(ChunkyardError::validation(format!(
            "{}{}: invalid flag '{}'",
            ENV_PREFIX, name, value
        ))),
    }
}
