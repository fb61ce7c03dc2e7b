use crate::config::PartitionPolicy;
use crate::join::JoinPhase;
use crate::relation::RelationSource;
use crate::types::Record;
use crate::{JoinError, Result};

/// Materializes at most `partition_size` relation records for one key
#[derive(Debug)]
pub struct PartitionLoader {
    partition_size: usize,
    policy: PartitionPolicy,
    key_field: String,
    partition: Vec<Record>,
    /// Key the current partition was loaded for
    key: Option<String>,
    loads: u64,
}

impl PartitionLoader {
    pub fn new(partition_size: usize, policy: PartitionPolicy, key_field: &str) -> Self {
        Self {
            partition_size,
            policy,
            key_field: key_field.to_string(),
            partition: Vec::with_capacity(partition_size.min(1024)),
            key: None,
            loads: 0,
        }
    }

    /// Replace the current partition with records for `key`.
    ///
    /// Counts as a processed partition even when nothing matched. On a scan
    /// failure the partition is left empty and the error carries the key.
    pub fn load<S: RelationSource + ?Sized>(&mut self, source: &S, key: &str) -> Result<usize> {
        self.partition.clear();
        self.key = Some(key.to_string());
        self.loads += 1;

        if let Err(e) = self.fill(source, key) {
            self.partition.clear();
            return Err(JoinError::RelationScan {
                key: key.to_string(),
                phase: JoinPhase::Partitioning,
                source: Box::new(e),
            });
        }

        tracing::trace!(
            relation = source.name(),
            key,
            records = self.partition.len(),
            "Loaded partition"
        );
        Ok(self.partition.len())
    }

    fn fill<S: RelationSource + ?Sized>(&mut self, source: &S, key: &str) -> Result<()> {
        let mut started = false;
        for record in source.scan()? {
            let record = record?;
            match self.policy {
                PartitionPolicy::ExactKey => {
                    if record.join_key(&self.key_field) == key {
                        self.partition.push(record);
                    }
                }
                PartitionPolicy::Sequential => {
                    if !started && record.join_key(&self.key_field) == key {
                        started = true;
                    }
                    if started {
                        self.partition.push(record);
                    }
                }
            }
            if self.partition.len() >= self.partition_size {
                break;
            }
        }
        Ok(())
    }

    pub fn records(&self) -> &[Record] {
        &self.partition
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn len(&self) -> usize {
        self.partition.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partition.is_empty()
    }

    /// Partitions loaded so far, including empty ones
    pub fn loads(&self) -> u64 {
        self.loads
    }

    pub fn policy(&self) -> PartitionPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::{MemoryRelation, RecordIter};

    fn relation(keys: &[&str]) -> MemoryRelation {
        let records = keys
            .iter()
            .enumerate()
            .map(|(i, k)| Record::new().with("id", *k).with("row", i as i64))
            .collect();
        MemoryRelation::new("r", records)
    }

    struct FailingRelation;

    impl RelationSource for FailingRelation {
        fn name(&self) -> &str {
            "failing"
        }

        fn scan(&self) -> Result<RecordIter<'_>> {
            Err(JoinError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "master data unavailable",
            )))
        }
    }

    #[test]
    fn test_exact_key_bounded() {
        let rel = relation(&["A", "B", "A", "A", "C"]);
        let mut loader = PartitionLoader::new(2, PartitionPolicy::ExactKey, "id");

        assert_eq!(loader.load(&rel, "A").unwrap(), 2);
        assert!(loader.records().iter().all(|r| r.join_key("id") == "A"));
        assert_eq!(loader.key(), Some("A"));
    }

    #[test]
    fn test_replaces_previous_partition_and_counts_empty_loads() {
        let rel = relation(&["A", "C"]);
        let mut loader = PartitionLoader::new(4, PartitionPolicy::ExactKey, "id");

        loader.load(&rel, "A").unwrap();
        assert_eq!(loader.load(&rel, "B").unwrap(), 0);
        assert!(loader.is_empty());
        assert_eq!(loader.loads(), 2);
    }

    #[test]
    fn test_sequential_block() {
        let rel = relation(&["A", "B", "C", "D", "E"]);
        let mut loader = PartitionLoader::new(3, PartitionPolicy::Sequential, "id");

        assert_eq!(loader.load(&rel, "B").unwrap(), 3);
        let keys: Vec<_> = loader.records().iter().map(|r| r.join_key("id")).collect();
        assert_eq!(keys, vec!["B", "C", "D"]);

        // block truncated by the end of the relation
        assert_eq!(loader.load(&rel, "E").unwrap(), 1);
        // key absent: nothing loaded
        assert_eq!(loader.load(&rel, "Z").unwrap(), 0);
    }

    #[test]
    fn test_scan_failure_propagates_with_key() {
        let mut loader = PartitionLoader::new(4, PartitionPolicy::ExactKey, "id");
        let err = loader.load(&FailingRelation, "K42").unwrap_err();
        match err {
            JoinError::RelationScan { key, phase, .. } => {
                assert_eq!(key, "K42");
                assert_eq!(phase, JoinPhase::Partitioning);
            }
            other => panic!("Expected relation scan error, got {:?}", other),
        }
        assert!(loader.is_empty());
    }
}
