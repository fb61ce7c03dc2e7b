//! HYBRIDJOIN core: hash index, key tracker, partition loader and engine

pub mod engine;
pub mod index;
pub mod partition;
pub mod tracker;

pub use engine::{CycleReport, EngineHandle, HybridJoin, JoinPhase, RunSummary};
pub use index::{HashIndex, SlotRouter, StreamTuple};
pub use partition::PartitionLoader;
pub use tracker::KeyTracker;
