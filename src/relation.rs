//! Master data (relation R) sources
//!
//! A source is read-only and re-scanned from the start for every partition
//! load, so the cost per partition is O(relation size) unless the source
//! indexes itself.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::types::Record;
use crate::{JoinError, Result};

pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// Re-scannable, read-only relation
pub trait RelationSource {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Start a full scan. Failures to open the source, and failures on any
    /// individual record, surface as errors rather than as missing records.
    fn scan(&self) -> Result<RecordIter<'_>>;
}

impl<T: RelationSource + ?Sized> RelationSource for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn scan(&self) -> Result<RecordIter<'_>> {
        (**self).scan()
    }
}

/// Relation held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryRelation {
    name: String,
    records: Vec<Record>,
}

impl MemoryRelation {
    pub fn new(name: &str, records: Vec<Record>) -> Self {
        Self {
            name: name.to_string(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RelationSource for MemoryRelation {
    fn name(&self) -> &str {
        &self.name
    }

    fn scan(&self) -> Result<RecordIter<'_>> {
        Ok(Box::new(self.records.iter().cloned().map(Ok)))
    }
}

/// Relation stored as newline-delimited JSON objects, read from disk on
/// every scan. Blank lines are skipped.
#[derive(Debug, Clone)]
pub struct JsonLinesRelation {
    name: String,
    path: PathBuf,
}

impl JsonLinesRelation {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "relation".to_string());
        Self { name, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RelationSource for JsonLinesRelation {
    fn name(&self) -> &str {
        &self.name
    }

    fn scan(&self) -> Result<RecordIter<'_>> {
        let file = File::open(&self.path)?;
        let path = self.path.display().to_string();

        let iter = BufReader::new(file)
            .lines()
            .enumerate()
            .filter_map(move |(idx, line)| match line {
                Err(e) => Some(Err(JoinError::Io(e))),
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(Record::from_json_line(&line).map_err(|e| {
                    JoinError::Malformed(format!("{}:{}: {}", path, idx + 1, e))
                })),
            });

        Ok(Box::new(iter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_memory_relation_rescans() {
        let relation = MemoryRelation::new(
            "customers",
            vec![Record::new().with("id", "1"), Record::new().with("id", "2")],
        );

        for _ in 0..2 {
            let records: Vec<_> = relation.scan().unwrap().collect::<Result<_>>().unwrap();
            assert_eq!(records.len(), 2);
        }
        assert_eq!(relation.name(), "customers");
    }

    #[test]
    fn test_json_lines_relation() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"Customer_ID": "1", "name": "Alice"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"Customer_ID": "2", "name": "Bob"}}"#).unwrap();
        file.flush().unwrap();

        let relation = JsonLinesRelation::new(file.path());
        let records: Vec<_> = relation.scan().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].join_key("Customer_ID"), "2");
    }

    #[test]
    fn test_json_lines_reports_bad_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"Customer_ID": "1"}}"#).unwrap();
        writeln!(file, "oops").unwrap();
        file.flush().unwrap();

        let relation = JsonLinesRelation::new(file.path());
        let result: Result<Vec<_>> = relation.scan().unwrap().collect();
        match result {
            Err(JoinError::Malformed(msg)) => assert!(msg.contains(":2:")),
            other => panic!("Expected malformed line error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let relation = JsonLinesRelation::new("/nonexistent/relation.jsonl");
        assert!(matches!(relation.scan(), Err(JoinError::Io(_))));
    }
}
