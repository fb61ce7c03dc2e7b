use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{JoinError, Result};

/// How the partition loader materializes relation records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartitionPolicy {
    /// Only records whose key equals the oldest pending key (filtered lookup)
    #[default]
    ExactKey,
    /// `partition_size` consecutive records starting at the first record
    /// for the oldest pending key (block read)
    Sequential,
}

/// Join engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    /// Hash slots (hS): upper bound on resident stream tuples
    pub hash_slots: usize,
    /// Partition size (vP): upper bound on relation records per iteration
    pub partition_size: usize,
    /// Intake queue capacity
    pub queue_capacity: usize,
    /// Bounded wait for a full intake queue before failing a submit
    pub admission_timeout_ms: u64,
    /// Pause before retrying when there is no pending work
    pub idle_backoff_ms: u64,
    /// Field holding the join key in both stream tuples and relation records
    pub key_field: String,
    pub partition_policy: PartitionPolicy,
    /// Producer logs progress every N submitted tuples (0 disables)
    pub progress_interval: u64,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            hash_slots: 10_000,
            partition_size: 500,
            queue_capacity: 5000,
            admission_timeout_ms: 10_000,
            idle_backoff_ms: 100,
            key_field: "Customer_ID".to_string(),
            partition_policy: PartitionPolicy::ExactKey,
            progress_interval: 50_000,
        }
    }
}

impl JoinConfig {
    pub fn new(hash_slots: usize, partition_size: usize) -> Self {
        Self {
            hash_slots,
            partition_size,
            ..Self::default()
        }
    }

    pub fn with_key_field(mut self, field: &str) -> Self {
        self.key_field = field.to_string();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_admission_timeout(mut self, timeout: Duration) -> Self {
        self.admission_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_partition_policy(mut self, policy: PartitionPolicy) -> Self {
        self.partition_policy = policy;
        self
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hash_slots == 0 {
            return Err(JoinError::InvalidConfig("hash_slots must be at least 1".into()));
        }
        if self.partition_size == 0 {
            return Err(JoinError::InvalidConfig("partition_size must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(JoinError::InvalidConfig("queue_capacity must be at least 1".into()));
        }
        if self.key_field.is_empty() {
            return Err(JoinError::InvalidConfig("key_field must not be empty".into()));
        }
        Ok(())
    }

    /// Parse a `JoinConfig` from TOML text; missing fields keep their defaults.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: JoinConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }
}
