//! Dispatcher configuration (TOML).
//!
//! ```toml
//! mode = "concurrent"
//! max_concurrency = 4
//! workers = 4
//! capacity = 1000
//! cancel_policy = "cascade"
//! default_timeout_ms = 30000
//!
//! [log]
//! level = "info"
//! ```
//!
//! Every field is optional; missing ones take their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::{CancelPolicy, QueueMode, QueueOptions};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mode: QueueMode,
    pub max_concurrency: usize,

    /// Initial worker count. The pool grows to the concurrency limit if that
    /// is larger.
    pub workers: usize,

    /// Maximum number of non-terminal tasks. Absent means unbounded.
    pub capacity: Option<usize>,
    pub cancel_policy: CancelPolicy,
    pub default_timeout_ms: Option<u64>,
    pub log: LogConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: QueueMode::Concurrent,
            max_concurrency: 4,
            workers: 4,
            capacity: None,
            cancel_policy: CancelPolicy::Cascade,
            default_timeout_ms: None,
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `info` or `shuttle_core=debug`.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.capacity == Some(0) {
            return Err(ConfigError::Invalid("capacity must be at least 1".into()));
        }
        if self.default_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "default_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Concurrency limit the queue will enforce.
    pub fn effective_concurrency(&self) -> usize {
        self.queue_options().effective_concurrency()
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            mode: self.mode,
            max_concurrency: self.max_concurrency,
            capacity: self.capacity,
            cancel_policy: self.cancel_policy,
            default_timeout: self.default_timeout(),
            start_paused: false,
        }
    }
}
