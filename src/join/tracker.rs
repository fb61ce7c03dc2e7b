use std::collections::{HashMap, VecDeque};

/// FIFO of join keys in the order they entered the hash index.
///
/// Holds one entry per distinct resident key: a key loaded again while still
/// pending keeps its original position. The front is the next key to service.
///
/// Removal is lazy. `pending` maps each live key to the sequence number of
/// its entry in `order`; entries whose number no longer matches are stale and
/// are skipped. The front of `order` is always live.
#[derive(Debug, Default)]
pub struct KeyTracker {
    order: VecDeque<(u64, String)>,
    pending: HashMap<String, u64>,
    next_seq: u64,
}

impl KeyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a load of `key`. Returns false if the key was already pending.
    pub fn push(&mut self, key: &str) -> bool {
        if self.pending.contains_key(key) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(key.to_string(), seq);
        self.order.push_back((seq, key.to_string()));
        true
    }

    pub fn oldest(&self) -> Option<&str> {
        self.order.front().map(|(_, key)| key.as_str())
    }

    /// Drop the entry for `key`, wherever it sits in arrival order
    pub fn remove(&mut self, key: &str) -> bool {
        if self.pending.remove(key).is_none() {
            return false;
        }

        while let Some((seq, front)) = self.order.front() {
            if self.pending.get(front) == Some(seq) {
                break;
            }
            self.order.pop_front();
        }

        // stale entries behind a long-waiting front key
        if self.order.len() > 2 * self.pending.len() + 64 {
            let pending = &self.pending;
            self.order.retain(|(seq, key)| pending.get(key) == Some(seq));
        }
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.pending.clear();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending keys in arrival order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let pending = &self.pending;
        self.order
            .iter()
            .filter(move |(seq, key)| pending.get(key) == Some(seq))
            .map(|(_, key)| key.as_str())
    }
}
