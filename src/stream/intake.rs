//! Bounded intake queue between the stream producer and the join engine
//!
//! Producer side blocks (with a bounded wait) when the queue is full; engine
//! side never blocks. Completion is a shared atomic flag, also raised when
//! every producer handle has been dropped.
//!
//! Submits still in progress when completion is signaled are tracked, so a
//! tuple accepted by any producer clone is always visible to the engine
//! before it considers the stream finished.

use crossbeam::channel::{bounded, Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::JoinConfig;
use crate::types::Record;
use crate::{JoinError, Result};

/// Create a connected producer/receiver pair sized from `config`
pub fn intake(config: &JoinConfig) -> (StreamProducer, IntakeReceiver) {
    let (sender, receiver) = bounded(config.queue_capacity);
    let complete = Arc::new(AtomicBool::new(false));
    let in_flight = Arc::new(AtomicUsize::new(0));

    let producer = StreamProducer {
        sender,
        complete: Arc::clone(&complete),
        in_flight: Arc::clone(&in_flight),
        submitted: Arc::new(AtomicU64::new(0)),
        admission_timeout: config.admission_timeout(),
        key_field: Arc::from(config.key_field.as_str()),
        progress_interval: config.progress_interval,
    };
    let receiver = IntakeReceiver {
        receiver,
        complete,
        in_flight,
    };

    (producer, receiver)
}

/// Producer handle. Cloneable; all clones feed the same queue.
#[derive(Clone)]
pub struct StreamProducer {
    sender: Sender<Record>,
    complete: Arc<AtomicBool>,
    /// Submits currently in progress across all clones
    in_flight: Arc<AtomicUsize>,
    submitted: Arc<AtomicU64>,
    admission_timeout: Duration,
    key_field: Arc<str>,
    progress_interval: u64,
}

impl StreamProducer {
    /// Enqueue one stream tuple.
    ///
    /// Blocks up to the admission timeout while the queue is full, then fails
    /// with `JoinError::Backpressure`. The tuple is never dropped silently.
    /// Once any clone has signaled completion, further submits fail with
    /// `JoinError::StreamClosed`.
    pub fn submit(&self, tuple: Record) -> Result<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.enqueue(tuple);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn enqueue(&self, tuple: Record) -> Result<()> {
        if self.is_complete() {
            return Err(JoinError::StreamClosed);
        }

        match self.sender.try_send(tuple) {
            Ok(()) => {}
            Err(TrySendError::Full(tuple)) => {
                tracing::warn!(
                    capacity = self.sender.capacity().unwrap_or(0),
                    timeout_ms = self.admission_timeout.as_millis() as u64,
                    "Intake queue full, waiting for space"
                );
                match self.sender.send_timeout(tuple, self.admission_timeout) {
                    Ok(()) => {}
                    Err(SendTimeoutError::Timeout(tuple)) => {
                        let key = tuple.join_key(&self.key_field);
                        tracing::error!(%key, "Intake queue timeout, join engine is not draining");
                        return Err(JoinError::Backpressure {
                            key,
                            waited: self.admission_timeout,
                        });
                    }
                    Err(SendTimeoutError::Disconnected(_)) => return Err(JoinError::StreamClosed),
                }
            }
            Err(TrySendError::Disconnected(_)) => return Err(JoinError::StreamClosed),
        }

        let n = self.submitted.fetch_add(1, Ordering::Relaxed) + 1;
        if self.progress_interval > 0 && n % self.progress_interval == 0 {
            tracing::info!(submitted = n, buffered = self.sender.len(), "Stream producer progress");
        }
        Ok(())
    }

    /// Submit every tuple, then signal completion.
    ///
    /// Completion is signaled even when a submit fails, so the engine drains
    /// what it already has and stops.
    pub fn submit_all<I>(&self, tuples: I) -> Result<u64>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut count = 0u64;
        for tuple in tuples {
            if let Err(e) = self.submit(tuple) {
                self.signal_completion();
                return Err(e);
            }
            count += 1;
        }
        self.signal_completion();
        Ok(count)
    }

    /// Mark the stream finished. Idempotent.
    pub fn signal_completion(&self) {
        if !self.complete.swap(true, Ordering::SeqCst) {
            tracing::info!(
                submitted = self.submitted.load(Ordering::Relaxed),
                "Stream producer signaled completion"
            );
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Tuples currently buffered in the queue
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

/// Engine side of the intake queue
pub struct IntakeReceiver {
    receiver: Receiver<Record>,
    complete: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
}

impl IntakeReceiver {
    /// Non-blocking dequeue. `None` when nothing is buffered.
    pub fn try_dequeue(&self) -> Option<Record> {
        match self.receiver.try_recv() {
            Ok(tuple) => Some(tuple),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                // every producer is gone: nothing more can arrive
                self.complete.store(true, Ordering::SeqCst);
                None
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    /// Submits currently in progress on any producer clone
    pub fn pending_submits(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Completion signaled, no submit still in progress, queue empty.
    ///
    /// The checks run in that order: a submit that started before the flag
    /// was raised has either landed in the queue or is still counted.
    pub fn is_finished(&self) -> bool {
        self.is_complete() && self.pending_submits() == 0 && self.is_empty()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
