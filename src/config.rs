// src/config.rs

//! Manages engine configuration: loading and validation.

use crate::core::batch::DEFAULT_BATCH_CAPACITY;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Upper bound accepted for `batch.capacity`.
const MAX_BATCH_CAPACITY: usize = 1_000_000;
/// Above this many records per batch a single reply may get very large.
const LARGE_BATCH_CAPACITY: usize = 10_000;

/// Settings for grouping per-file operations into batches.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BatchConfig {
    /// The maximum number of records in one batch request.
    #[serde(default = "default_batch_capacity")]
    pub capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            capacity: default_batch_capacity(),
        }
    }
}

fn default_batch_capacity() -> usize {
    DEFAULT_BATCH_CAPACITY
}

/// Settings for driving tasks against the transaction channel.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransportConfig {
    /// How often a task is polled while a transaction is outstanding.
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(5)
}

/// Settings for reclaiming playground files.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReclaimConfig {
    /// Consecutive unlink passes without progress before giving up.
    #[serde(default = "default_max_no_progress_passes")]
    pub max_no_progress_passes: u32,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            max_no_progress_passes: default_max_no_progress_passes(),
        }
    }
}

fn default_max_no_progress_passes() -> u32 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Represents the final, validated engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub reclaim: ReclaimConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            batch: BatchConfig::default(),
            transport: TransportConfig::default(),
            reclaim: ReclaimConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config in '{path}'"))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.log_level.trim().is_empty() {
            return Err(anyhow!("log_level cannot be empty"));
        }
        if self.batch.capacity == 0 {
            return Err(anyhow!("batch.capacity cannot be 0"));
        }
        if self.batch.capacity > MAX_BATCH_CAPACITY {
            return Err(anyhow!(
                "batch.capacity cannot exceed {}",
                MAX_BATCH_CAPACITY
            ));
        }
        if self.batch.capacity > LARGE_BATCH_CAPACITY {
            warn!(
                "large batch.capacity setting: {} records. Replies for a full batch may be slow to produce.",
                self.batch.capacity
            );
        }
        if self.transport.poll_interval.is_zero() {
            return Err(anyhow!("transport.poll_interval cannot be 0"));
        }
        if self.reclaim.max_no_progress_passes == 0 {
            return Err(anyhow!("reclaim.max_no_progress_passes cannot be 0"));
        }
        Ok(())
    }
}
