//! Stack configuration.
//!
//! # Responsibility
//! - Describe where a stack keeps its store and how connections wait on locks.
//! - Load that description from JSON.
//!
//! # Invariants
//! - A file store path is never empty.
//! - `busy_timeout_ms` is at least 1.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Where a stack's store lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreLocation {
    File { path: PathBuf },
    /// Process-local store shared by every context of one stack.
    Memory,
}

/// Stack construction options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackConfig {
    pub store: StoreLocation,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl StackConfig {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            store: StoreLocation::File {
                path: path.as_ref().to_path_buf(),
            },
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }

    pub fn memory() -> Self {
        Self {
            store: StoreLocation::Memory,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&input)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let StoreLocation::File { path } = &self.store {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "store.path cannot be empty".to_string(),
                ));
            }
        }
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self::memory()
    }
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config JSON: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, StackConfig, StoreLocation, DEFAULT_BUSY_TIMEOUT_MS};
    use std::path::PathBuf;

    #[test]
    fn parses_file_store_with_default_timeout() {
        let config =
            StackConfig::from_json_str(r#"{"store":{"kind":"file","path":"/tmp/people.db"}}"#)
                .expect("file config parses");
        assert_eq!(
            config.store,
            StoreLocation::File {
                path: PathBuf::from("/tmp/people.db")
            }
        );
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
    }

    #[test]
    fn parses_memory_store() {
        let config =
            StackConfig::from_json_str(r#"{"store":{"kind":"memory"},"busy_timeout_ms":250}"#)
                .expect("memory config parses");
        assert_eq!(config.store, StoreLocation::Memory);
        assert_eq!(config.busy_timeout().as_millis(), 250);
    }

    #[test]
    fn rejects_zero_timeout_and_empty_path() {
        let err = StackConfig::from_json_str(r#"{"store":{"kind":"memory"},"busy_timeout_ms":0}"#)
            .expect_err("zero timeout must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = StackConfig::from_json_str(r#"{"store":{"kind":"file","path":""}}"#)
            .expect_err("empty path must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_store_kind() {
        let err = StackConfig::from_json_str(r#"{"store":{"kind":"cloud"}}"#)
            .expect_err("unknown kind must fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
