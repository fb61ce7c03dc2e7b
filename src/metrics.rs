//! Join engine statistics
//!
//! Counters and gauges live in a per-engine prometheus registry. Handles are
//! cheap to clone and safe to read from any thread while the engine runs.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use serde::Serialize;

use crate::Result;

/// Point-in-time statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JoinStats {
    pub tuples_processed: u64,
    pub tuples_joined: u64,
    pub tuples_unmatched: u64,
    pub partitions_processed: u64,
    pub iterations: u64,
    /// Occupied hash slots
    pub hash_table_size: u64,
    /// Keys waiting in the arrival tracker
    pub queue_size: u64,
    pub resident_tuples: u64,
    /// Current capacity budget (w)
    pub capacity: u64,
    /// Tuples waiting in the intake queue
    pub intake_size: u64,
}

#[derive(Clone)]
pub struct JoinMetrics {
    registry: Registry,
    tuples_processed: IntCounter,
    tuples_joined: IntCounter,
    tuples_unmatched: IntCounter,
    partitions_processed: IntCounter,
    iterations: IntCounter,
    hash_table_size: IntGauge,
    queue_size: IntGauge,
    resident_tuples: IntGauge,
    capacity: IntGauge,
    intake_size: IntGauge,
}

impl JoinMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("hybridjoin".to_string()), None)?;

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };
        let gauge = |name: &str, help: &str| -> Result<IntGauge> {
            let g = IntGauge::new(name, help)?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };

        Ok(Self {
            tuples_processed: counter(
                "tuples_processed_total",
                "Stream tuples admitted into the hash index",
            )?,
            tuples_joined: counter("tuples_joined_total", "Joined records emitted")?,
            tuples_unmatched: counter(
                "tuples_unmatched_total",
                "Stream tuples evicted without a relation match",
            )?,
            partitions_processed: counter(
                "partitions_processed_total",
                "Relation partitions loaded",
            )?,
            iterations: counter("iterations_total", "Completed load/probe cycles")?,
            hash_table_size: gauge("hash_table_slots", "Occupied hash slots")?,
            queue_size: gauge("key_queue_size", "Keys pending in arrival order")?,
            resident_tuples: gauge("resident_tuples", "Stream tuples held in the hash index")?,
            capacity: gauge("capacity_budget", "Admission slots available to the next load")?,
            intake_size: gauge("intake_queue_size", "Tuples waiting in the intake queue")?,
            registry,
        })
    }

    pub(crate) fn record_loaded(&self, n: usize) {
        self.tuples_processed.inc_by(n as u64);
    }

    pub(crate) fn record_joined(&self, n: usize) {
        self.tuples_joined.inc_by(n as u64);
    }

    pub(crate) fn record_unmatched(&self, n: usize) {
        self.tuples_unmatched.inc_by(n as u64);
    }

    pub(crate) fn record_partition(&self) {
        self.partitions_processed.inc();
    }

    pub(crate) fn record_iteration(&self) {
        self.iterations.inc();
    }

    pub(crate) fn set_sizes(
        &self,
        slots: usize,
        keys: usize,
        resident: usize,
        capacity: usize,
        intake: usize,
    ) {
        self.hash_table_size.set(slots as i64);
        self.queue_size.set(keys as i64);
        self.resident_tuples.set(resident as i64);
        self.capacity.set(capacity as i64);
        self.intake_size.set(intake as i64);
    }

    pub fn snapshot(&self) -> JoinStats {
        JoinStats {
            tuples_processed: self.tuples_processed.get(),
            tuples_joined: self.tuples_joined.get(),
            tuples_unmatched: self.tuples_unmatched.get(),
            partitions_processed: self.partitions_processed.get(),
            iterations: self.iterations.get(),
            hash_table_size: self.hash_table_size.get().max(0) as u64,
            queue_size: self.queue_size.get().max(0) as u64,
            resident_tuples: self.resident_tuples.get().max(0) as u64,
            capacity: self.capacity.get().max(0) as u64,
            intake_size: self.intake_size.get().max(0) as u64,
        }
    }

    /// Prometheus text exposition of every engine metric
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::JoinError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_updates() {
        let metrics = JoinMetrics::new().unwrap();
        metrics.record_loaded(4);
        metrics.record_joined(3);
        metrics.record_partition();
        metrics.record_partition();
        metrics.set_sizes(2, 1, 1, 3, 0);

        let stats = metrics.snapshot();
        assert_eq!(stats.tuples_processed, 4);
        assert_eq!(stats.tuples_joined, 3);
        assert_eq!(stats.partitions_processed, 2);
        assert_eq!(stats.hash_table_size, 2);
        assert_eq!(stats.capacity, 3);
    }

    #[test]
    fn test_clones_share_state() {
        let metrics = JoinMetrics::new().unwrap();
        let reader = metrics.clone();
        metrics.record_joined(5);
        assert_eq!(reader.snapshot().tuples_joined, 5);
    }

    #[test]
    fn test_encode_uses_namespace() {
        let metrics = JoinMetrics::new().unwrap();
        metrics.record_loaded(1);
        let text = metrics.encode().unwrap();
        assert!(text.contains("hybridjoin_tuples_processed_total 1"));
    }
}
