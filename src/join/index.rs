//! Hash index of stream tuples awaiting a relation match
//!
//! Slots are `xxh3(key) % hash_slots`. Only occupied slots are materialized;
//! a slot disappears as soon as its last tuple is evicted.

use std::collections::HashMap;
use xxhash_rust::xxh3::xxh3_64;

use crate::types::Record;

/// Routes join keys to hash slots
#[derive(Debug, Clone, Copy)]
pub struct SlotRouter {
    num_slots: usize,
}

impl SlotRouter {
    pub fn new(num_slots: usize) -> Self {
        Self { num_slots: num_slots.max(1) }
    }

    pub fn slot_for(&self, key: &str) -> usize {
        (xxh3_64(key.as_bytes()) % self.num_slots as u64) as usize
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }
}

/// Stream tuple with its join key extracted once at load time
#[derive(Debug, Clone)]
pub struct StreamTuple {
    pub key: String,
    pub record: Record,
}

#[derive(Debug)]
pub struct HashIndex {
    router: SlotRouter,
    slots: HashMap<usize, Vec<StreamTuple>>,
    resident: usize,
}

impl HashIndex {
    pub fn new(hash_slots: usize) -> Self {
        Self {
            router: SlotRouter::new(hash_slots),
            slots: HashMap::new(),
            resident: 0,
        }
    }

    pub fn slot_for(&self, key: &str) -> usize {
        self.router.slot_for(key)
    }

    pub fn insert(&mut self, key: String, record: Record) {
        let slot = self.router.slot_for(&key);
        self.slots
            .entry(slot)
            .or_default()
            .push(StreamTuple { key, record });
        self.resident += 1;
    }

    /// Resident tuples with exactly this key, in load order
    pub fn matches<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a StreamTuple> + 'a {
        self.slots
            .get(&self.router.slot_for(key))
            .into_iter()
            .flat_map(move |tuples| tuples.iter().filter(move |t| t.key == key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.matches(key).next().is_some()
    }

    /// Remove every tuple with this key from its slot, preserving load order
    /// of both the evicted and the remaining tuples. Colliding keys in the
    /// same slot are left untouched.
    pub fn evict(&mut self, key: &str) -> Vec<StreamTuple> {
        let slot = self.router.slot_for(key);
        let Some(tuples) = self.slots.get_mut(&slot) else {
            return Vec::new();
        };

        let (evicted, kept): (Vec<_>, Vec<_>) =
            std::mem::take(tuples).into_iter().partition(|t| t.key == key);

        if kept.is_empty() {
            self.slots.remove(&slot);
        } else {
            *tuples = kept;
        }

        self.resident -= evicted.len();
        evicted
    }

    /// Occupied slots
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Stream tuples currently held
    pub fn resident(&self) -> usize {
        self.resident
    }

    pub fn is_empty(&self) -> bool {
        self.resident == 0
    }

    /// Discard everything still resident; returns how many tuples were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.resident;
        self.slots.clear();
        self.resident = 0;
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(key: &str, n: i64) -> Record {
        Record::new().with("k", key).with("n", n)
    }

    /// Find two distinct keys that share a slot
    fn colliding_keys(index: &HashIndex) -> (String, String) {
        let first = "key-0".to_string();
        let slot = index.slot_for(&first);
        let second = (1..)
            .map(|i| format!("key-{}", i))
            .find(|k| index.slot_for(k) == slot)
            .unwrap();
        (first, second)
    }

    #[test]
    fn test_router_deterministic_and_bounded() {
        let router = SlotRouter::new(16);
        for i in 0..1000 {
            let key = format!("customer-{}", i);
            let slot = router.slot_for(&key);
            assert!(slot < 16);
            assert_eq!(slot, router.slot_for(&key));
        }
    }

    #[test]
    fn test_insert_and_evict() {
        let mut index = HashIndex::new(8);
        index.insert("a".into(), rec("a", 1));
        index.insert("b".into(), rec("b", 2));
        index.insert("a".into(), rec("a", 3));
        assert_eq!(index.resident(), 3);

        let evicted = index.evict("a");
        assert_eq!(evicted.len(), 2);
        assert_eq!(evicted[0].record.get("n").and_then(|v| v.as_i64()), Some(1));
        assert_eq!(evicted[1].record.get("n").and_then(|v| v.as_i64()), Some(3));
        assert_eq!(index.resident(), 1);
        assert!(!index.contains_key("a"));
        assert!(index.contains_key("b"));

        assert!(index.evict("a").is_empty());
    }

    #[test]
    fn test_collisions_disambiguated_by_key() {
        let mut index = HashIndex::new(4);
        let (k1, k2) = colliding_keys(&index);

        index.insert(k1.clone(), rec(&k1, 1));
        index.insert(k2.clone(), rec(&k2, 2));
        assert_eq!(index.slot_count(), 1);
        assert_eq!(index.matches(&k1).count(), 1);

        let evicted = index.evict(&k1);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key, k1);
        // slot survives while the colliding key is still resident
        assert_eq!(index.slot_count(), 1);
        assert!(index.contains_key(&k2));

        index.evict(&k2);
        assert_eq!(index.slot_count(), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_empty_key_is_a_valid_key() {
        let mut index = HashIndex::new(4);
        index.insert(String::new(), rec("", 1));
        assert!(index.contains_key(""));
        assert_eq!(index.evict("").len(), 1);
    }

    #[test]
    fn test_clear_reports_dropped() {
        let mut index = HashIndex::new(4);
        index.insert("a".into(), rec("a", 1));
        index.insert("b".into(), rec("b", 1));
        assert_eq!(index.clear(), 2);
        assert_eq!(index.slot_count(), 0);
    }
}
