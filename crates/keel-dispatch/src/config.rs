//! Dispatcher configuration (keel.toml)
//!
//! Settings live under a `[dispatcher]` table so the file can be shared with
//! other sections owned by the embedding application.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Worker pool size (0 = number of CPU cores)
    pub worker_threads: usize,

    /// Smallest number of tasks handed to one partition of a parallel batch
    pub min_parallel_chunk: usize,

    /// Name prefix for pool and dispatch threads
    pub thread_name: String,

    /// How long `shutdown` waits for the dispatch loop to exit
    pub shutdown_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            min_parallel_chunk: 1,
            thread_name: "keel".to_string(),
            shutdown_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    dispatcher: DispatcherConfig,
}

impl DispatcherConfig {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from TOML text; missing keys take their defaults
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        file.dispatcher.validate()?;
        Ok(file.dispatcher)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_parallel_chunk == 0 {
            return Err(ConfigError::Invalid(
                "min_parallel_chunk must be at least 1".to_string(),
            ));
        }

        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "thread_name cannot be empty".to_string(),
            ));
        }

        if self.shutdown_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "shutdown_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Worker count with the `0 = all cores` rule applied
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get()
        } else {
            self.worker_threads
        }
    }

    /// Shutdown timeout as a duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
