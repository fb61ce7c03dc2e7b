//! HYBRIDJOIN orchestrator
//!
//! Drives the `Loading → Scheduling → Partitioning → Probing` cycle over the
//! hash index, key tracker and partition loader. All engine state is owned by
//! one worker; only the intake queue, the completion flag and the count of
//! in-progress submits are shared with the producer.
//!
//! Capacity accounting: `capacity` (w) is what the next load may admit. A
//! load zeroes it and parks the part it did not use in `reserved`; the probe
//! phase returns `reserved` plus every evicted tuple. Hence
//! `capacity + reserved + resident == hash_slots` between phases, and resident
//! tuples never exceed `hash_slots`.

use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::JoinConfig;
use crate::join::index::HashIndex;
use crate::join::partition::PartitionLoader;
use crate::join::tracker::KeyTracker;
use crate::metrics::{JoinMetrics, JoinStats};
use crate::relation::RelationSource;
use crate::stream::{intake, IntakeReceiver, StreamProducer};
use crate::types::Record;
use crate::{JoinError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPhase {
    Loading,
    Scheduling,
    Partitioning,
    Probing,
    Done,
}

impl fmt::Display for JoinPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinPhase::Loading => "loading",
            JoinPhase::Scheduling => "scheduling",
            JoinPhase::Partitioning => "partitioning",
            JoinPhase::Probing => "probing",
            JoinPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Outcome of one engine cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub iteration: u64,
    pub loaded: usize,
    /// Key serviced this cycle; `None` on an idle cycle
    pub key: Option<String>,
    pub partition_len: usize,
    pub matched: usize,
    /// Tuples evicted because the relation has no record for their key
    pub unmatched: usize,
    pub joined_total: u64,
    pub hash_table_size: usize,
    pub tracker_size: usize,
    pub resident: usize,
}

impl CycleReport {
    /// Nothing to service yet, the caller should back off before retrying
    pub fn is_idle(&self) -> bool {
        self.key.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stats: JoinStats,
    pub elapsed: Duration,
}

pub struct HybridJoin {
    config: JoinConfig,
    intake: IntakeReceiver,
    index: HashIndex,
    tracker: KeyTracker,
    loader: PartitionLoader,
    /// Capacity budget (w)
    capacity: usize,
    reserved: usize,
    output: Vec<Record>,
    metrics: JoinMetrics,
    phase: JoinPhase,
    iteration: u64,
    joined_total: u64,
}

impl HybridJoin {
    /// Build an engine and the producer handle feeding it
    pub fn new(config: JoinConfig) -> Result<(Self, StreamProducer)> {
        config.validate()?;
        let (producer, receiver) = intake(&config);
        let engine = Self::with_intake(config, receiver)?;
        Ok((engine, producer))
    }

    pub fn with_intake(config: JoinConfig, intake: IntakeReceiver) -> Result<Self> {
        config.validate()?;
        let metrics = JoinMetrics::new()?;
        let engine = Self {
            index: HashIndex::new(config.hash_slots),
            tracker: KeyTracker::new(),
            loader: PartitionLoader::new(
                config.partition_size,
                config.partition_policy,
                &config.key_field,
            ),
            capacity: config.hash_slots,
            reserved: 0,
            output: Vec::new(),
            metrics,
            phase: JoinPhase::Loading,
            iteration: 0,
            joined_total: 0,
            intake,
            config,
        };
        engine.publish();

        tracing::info!(
            hash_slots = engine.config.hash_slots,
            partition_size = engine.config.partition_size,
            policy = ?engine.config.partition_policy,
            key_field = %engine.config.key_field,
            "HYBRIDJOIN initialized"
        );
        Ok(engine)
    }

    /// Admit up to `capacity` tuples from the intake queue into the hash
    /// index and key tracker. Never blocks. Leaves `capacity` at zero.
    pub fn load(&mut self) -> usize {
        let budget = self.capacity;
        let mut loaded = 0;

        while loaded < budget {
            let Some(tuple) = self.intake.try_dequeue() else {
                break;
            };
            let key = tuple.join_key(&self.config.key_field);
            self.tracker.push(&key);
            self.index.insert(key, tuple);
            loaded += 1;
        }

        self.reserved += budget - loaded;
        self.capacity = 0;
        self.metrics.record_loaded(loaded);
        self.publish();
        tracing::trace!(loaded, resident = self.index.resident(), "Loaded stream tuples");
        loaded
    }

    /// Longest-waiting pending key
    pub fn oldest_key(&self) -> Option<&str> {
        self.tracker.oldest()
    }

    pub fn load_partition<S: RelationSource + ?Sized>(
        &mut self,
        source: &S,
        key: &str,
    ) -> Result<usize> {
        let result = self.loader.load(source, key);
        // counted even when empty or failed
        self.metrics.record_partition();
        result
    }

    /// Join the current partition against the hash index.
    ///
    /// Every resident tuple whose key matches a partition record is emitted
    /// once (merged with the first such record) and evicted. If the key the
    /// partition was loaded for is still resident afterwards, the relation
    /// has no record for it and its tuples are evicted unmatched. Returns the
    /// number of joined records emitted.
    pub fn probe(&mut self) -> usize {
        self.probe_partition().0
    }

    /// Returns `(matched, unmatched)`
    fn probe_partition(&mut self) -> (usize, usize) {
        let key_field = &self.config.key_field;
        let mut matched = 0;

        for relation in self.loader.records() {
            let key = relation.join_key(key_field);
            let evicted = self.index.evict(&key);
            if evicted.is_empty() {
                continue;
            }
            for tuple in &evicted {
                self.output.push(Record::merge(&tuple.record, relation));
            }
            matched += evicted.len();
            self.tracker.remove(&key);
        }

        let mut unmatched = 0;
        if let Some(serviced) = self.loader.key() {
            let dropped = self.index.evict(serviced);
            if !dropped.is_empty() {
                unmatched = dropped.len();
                tracing::debug!(
                    key = serviced,
                    dropped = unmatched,
                    "No master data for key, evicting"
                );
            }
            self.tracker.remove(serviced);
        }

        self.joined_total += matched as u64;
        self.metrics.record_joined(matched);
        self.metrics.record_unmatched(unmatched);

        self.capacity += matched + unmatched;
        self.release_reserved();
        self.publish();
        (matched, unmatched)
    }

    /// Run one full cycle. Returns `None` once the terminal condition holds:
    /// completion signaled, intake empty, tracker empty.
    pub fn step<S: RelationSource + ?Sized>(&mut self, source: &S) -> Result<Option<CycleReport>> {
        if self.phase == JoinPhase::Done {
            return Ok(None);
        }

        self.phase = JoinPhase::Loading;
        let loaded = self.load();

        self.phase = JoinPhase::Scheduling;
        let Some(key) = self.oldest_key().map(str::to_string) else {
            // tracker empty means nothing is resident
            self.release_reserved();
            if self.is_drained() {
                self.finish();
                return Ok(None);
            }
            self.phase = JoinPhase::Loading;
            self.publish();
            return Ok(Some(self.report(loaded, None, 0, 0, 0)));
        };

        self.phase = JoinPhase::Partitioning;
        let partition_len = match self.load_partition(source, &key) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(%key, phase = %self.phase, error = %e, "Partition load failed");
                return Err(e);
            }
        };

        self.phase = JoinPhase::Probing;
        let (matched, unmatched) = self.probe_partition();

        self.iteration += 1;
        self.metrics.record_iteration();
        self.publish();

        let report = self.report(loaded, Some(key), partition_len, matched, unmatched);
        tracing::debug!(
            iteration = report.iteration,
            loaded,
            matched,
            unmatched,
            joined = self.joined_total,
            slots = report.hash_table_size,
            tracker = report.tracker_size,
            "Cycle complete"
        );

        if self.is_drained() {
            self.finish();
        } else {
            self.phase = JoinPhase::Loading;
        }
        Ok(Some(report))
    }

    /// Run to completion, keeping every joined record in `output()`
    pub fn run<S: RelationSource + ?Sized>(&mut self, source: &S) -> Result<RunSummary> {
        self.drive(source, |_| Ok(()))
    }

    /// Run to completion, handing each cycle's joined records to `sink`
    pub fn run_with_sink<S, F>(&mut self, source: &S, mut sink: F) -> Result<RunSummary>
    where
        S: RelationSource + ?Sized,
        F: FnMut(Vec<Record>) -> Result<()>,
    {
        self.drive(source, |engine| {
            if engine.output.is_empty() {
                return Ok(());
            }
            sink(engine.drain_output())
        })
    }

    fn drive<S, F>(&mut self, source: &S, mut after_cycle: F) -> Result<RunSummary>
    where
        S: RelationSource + ?Sized,
        F: FnMut(&mut Self) -> Result<()>,
    {
        let start = Instant::now();
        tracing::info!(relation = source.name(), "Starting HYBRIDJOIN execution");

        loop {
            let report = match self.step(source) {
                Ok(Some(report)) => report,
                Ok(None) => break,
                Err(e) => {
                    self.abort();
                    return Err(e);
                }
            };
            if let Err(e) = after_cycle(self) {
                self.abort();
                return Err(e);
            }
            if report.is_idle() {
                thread::sleep(self.config.idle_backoff());
            }
        }

        let stats = self.stats();
        let elapsed = start.elapsed();
        tracing::info!(
            tuples_processed = stats.tuples_processed,
            tuples_joined = stats.tuples_joined,
            tuples_unmatched = stats.tuples_unmatched,
            partitions_processed = stats.partitions_processed,
            elapsed_ms = elapsed.as_millis() as u64,
            "HYBRIDJOIN execution complete"
        );
        Ok(RunSummary { stats, elapsed })
    }

    /// Run on a dedicated worker thread
    pub fn spawn<S>(mut self, source: S) -> EngineHandle
    where
        S: RelationSource + Send + 'static,
    {
        let metrics = self.metrics.clone();
        let handle = thread::spawn(move || -> Result<(RunSummary, Vec<Record>)> {
            let summary = self.run(&source)?;
            Ok((summary, self.into_output()))
        });
        EngineHandle { metrics, handle }
    }

    /// Joined records emitted since the last drain
    pub fn drain_output(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.output)
    }

    pub fn output(&self) -> &[Record] {
        &self.output
    }

    pub fn into_output(self) -> Vec<Record> {
        self.output
    }

    /// Counters from the metrics registry with sizes read live from the
    /// engine, so the snapshot is consistent between phases too
    pub fn stats(&self) -> JoinStats {
        JoinStats {
            hash_table_size: self.index.slot_count() as u64,
            queue_size: self.tracker.len() as u64,
            resident_tuples: self.index.resident() as u64,
            capacity: self.capacity as u64,
            intake_size: self.intake.len() as u64,
            ..self.metrics.snapshot()
        }
    }

    pub fn metrics(&self) -> JoinMetrics {
        self.metrics.clone()
    }

    pub fn phase(&self) -> JoinPhase {
        self.phase
    }

    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    /// Current capacity budget (w)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn resident(&self) -> usize {
        self.index.resident()
    }

    pub fn partition(&self) -> &[Record] {
        self.loader.records()
    }

    pub fn pending_keys(&self) -> impl Iterator<Item = &str> {
        self.tracker.iter()
    }

    fn release_reserved(&mut self) {
        self.capacity += self.reserved;
        self.reserved = 0;
        debug_assert_eq!(
            self.capacity + self.index.resident(),
            self.config.hash_slots,
            "capacity budget out of sync with resident tuples"
        );
    }

    fn is_drained(&self) -> bool {
        self.intake.is_finished() && self.tracker.is_empty()
    }

    fn finish(&mut self) {
        self.phase = JoinPhase::Done;
        self.publish();
    }

    fn abort(&mut self) {
        let dropped = self.index.clear();
        self.tracker.clear();
        if dropped > 0 {
            tracing::warn!(dropped, "Run aborted, discarding unmatched stream tuples");
        }
        self.capacity = self.config.hash_slots;
        self.reserved = 0;
        self.phase = JoinPhase::Done;
        self.publish();
    }

    fn publish(&self) {
        self.metrics.set_sizes(
            self.index.slot_count(),
            self.tracker.len(),
            self.index.resident(),
            self.capacity,
            self.intake.len(),
        );
    }

    fn report(
        &self,
        loaded: usize,
        key: Option<String>,
        partition_len: usize,
        matched: usize,
        unmatched: usize,
    ) -> CycleReport {
        CycleReport {
            iteration: self.iteration,
            loaded,
            key,
            partition_len,
            matched,
            unmatched,
            joined_total: self.joined_total,
            hash_table_size: self.index.slot_count(),
            tracker_size: self.tracker.len(),
            resident: self.index.resident(),
        }
    }
}

/// Engine running on a worker thread
pub struct EngineHandle {
    metrics: JoinMetrics,
    handle: JoinHandle<Result<(RunSummary, Vec<Record>)>>,
}

impl EngineHandle {
    /// Statistics while the engine runs. Counters are live; sizes are as of
    /// the last completed load or probe phase.
    pub fn stats(&self) -> JoinStats {
        self.metrics.snapshot()
    }

    pub fn metrics(&self) -> &JoinMetrics {
        &self.metrics
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to finish; returns the summary and every joined record
    pub fn join(self) -> Result<(RunSummary, Vec<Record>)> {
        self.handle
            .join()
            .map_err(|_| JoinError::Internal("join engine thread panicked".into()))?
    }
}
