//! Pipeline configuration.
//!
//! Every knob has a default, so an empty JSON object is a valid
//! configuration file. Command line flags override file values.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::segment::{DEFAULT_RECORD_END, DEFAULT_RECORD_START, Delimiters, TrailingBlock};

/// Settings for one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Prefix of worker thread names.
    pub pool_name: String,
    /// Worker threads; 0 means one per available CPU.
    pub workers: usize,
    /// Blocks that may wait for a free worker before the reader stalls.
    pub admission_capacity: usize,
    /// Pending results buffered between reader and sink.
    pub delivery_capacity: usize,
    /// Regex opening a record.
    pub record_start: String,
    /// Regex closing a record.
    pub record_end: String,
    pub trailing_block: TrailingBlock,
    /// Seconds between progress lines while the pool drains.
    pub shutdown_log_interval_secs: u64,
    /// Log a progress line every this many delivered blocks; 0 disables.
    pub progress_interval: usize,
    /// Stop the run when a transformation task panics.
    pub abort_on_task_failure: bool,
    /// Store the raw record markup in `fullrecord`.
    pub keep_full_record: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool_name: "gnd".to_string(),
            workers: 0,
            admission_capacity: 100,
            delivery_capacity: 1_000,
            record_start: DEFAULT_RECORD_START.to_string(),
            record_end: DEFAULT_RECORD_END.to_string(),
            trailing_block: TrailingBlock::Discard,
            shutdown_log_interval_secs: 10,
            progress_interval: 100_000,
            abort_on_task_failure: false,
            keep_full_record: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Reject values no run can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_name.is_empty() {
            return Err(ConfigError::InvalidParameter {
                parameter: "pool_name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        for (parameter, value) in [
            ("admission_capacity", self.admission_capacity),
            ("delivery_capacity", self.delivery_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidParameter {
                    parameter: parameter.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        self.delimiters().map(|_| ())
    }

    /// Worker count with 0 resolved to the available parallelism.
    pub fn effective_workers(&self) -> usize {
        match self.workers {
            0 => thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
    }

    pub fn delimiters(&self) -> Result<Delimiters, ConfigError> {
        Delimiters::new(&self.record_start, &self.record_end)
    }

    pub fn shutdown_log_interval(&self) -> Duration {
        Duration::from_secs(self.shutdown_log_interval_secs)
    }
}
