//! Typed records and the per-snapshot record set

use std::collections::HashMap;
use tracing::warn;

use crate::error::{Result, SyncError};

/// One typed payload value bound into the target table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

/// One entity instance to reconcile: a primary key plus change-tracked payload.
///
/// `payload` is positional and lines up with the target table's payload columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub payload: Vec<FieldValue>,
    /// Source line the record was derived from
    pub line: u64,
}

impl Record {
    pub fn new(key: impl Into<String>, payload: Vec<FieldValue>, line: u64) -> Self {
        Self {
            key: key.into(),
            payload,
            line,
        }
    }
}

/// All records derived from one source snapshot, unique by key.
///
/// Iteration order is insertion order.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: Vec<Record>,
    index: HashMap<String, usize>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Build a set from records, applying the duplicate-key policy of [`RecordSet::insert`]
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Result<Self> {
        let mut set = Self::new();
        for record in records {
            set.insert(record)?;
        }
        Ok(set)
    }

    /// Add a record.
    ///
    /// An exact duplicate (same key, same payload) is dropped and `false` is
    /// returned. The same key with a different payload is a `DuplicateKey` error.
    pub fn insert(&mut self, record: Record) -> Result<bool> {
        if let Some(&existing) = self.index.get(&record.key) {
            let first = &self.records[existing];
            if first.payload != record.payload {
                return Err(SyncError::DuplicateKey {
                    key: record.key,
                    first_line: first.line,
                    line: record.line,
                });
            }

            warn!(
                key = %record.key,
                first_line = first.line,
                line = record.line,
                "Dropping repeated row with identical payload"
            );
            return Ok(false);
        }

        self.index.insert(record.key.clone(), self.records.len());
        self.records.push(record);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.index.get(key).map(|&i| &self.records[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[Record] {
        &self.records
    }

    /// Primary keys in iteration order
    pub fn keys(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key.clone()).collect()
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
