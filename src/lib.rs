//! LumaDB HYBRIDJOIN
//!
//! Bounded-memory join of an unbounded tuple stream against a large,
//! read-only master data relation:
//! - Bounded intake queue with backpressure between producer and engine
//! - Hash index of pending stream tuples, capped at `hash_slots` tuples
//! - FIFO key tracker choosing which relation partition to load next
//! - Partition loader, probe/evict/emit cycle and run-loop orchestrator

pub mod config;
pub mod join;
pub mod metrics;
pub mod relation;
pub mod stream;
pub mod types;

pub use config::{JoinConfig, PartitionPolicy};
pub use join::{CycleReport, EngineHandle, HybridJoin, JoinPhase, RunSummary};
pub use metrics::{JoinMetrics, JoinStats};
pub use relation::{JsonLinesRelation, MemoryRelation, RelationSource};
pub use stream::{IntakeReceiver, StreamProducer};
pub use types::{Record, Value};

use std::time::Duration;
use thiserror::Error;

/// Core error type for the join engine
#[derive(Error, Debug)]
pub enum JoinError {
    #[error("Backpressure: intake queue full for {waited:?} while submitting key '{key}'")]
    Backpressure { key: String, waited: Duration },
    #[error("Stream closed: no further tuples accepted")]
    StreamClosed,
    #[error("Relation scan failed during {phase} for key '{key}': {source}")]
    RelationScan {
        key: String,
        phase: JoinPhase,
        #[source]
        source: Box<JoinError>,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Malformed record: {0}")]
    Malformed(String),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config Error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("Metrics Error: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("Internal Error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, JoinError>;
