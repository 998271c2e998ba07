//! Schema mapping: raw rows -> typed records
//!
//! Row 0 is always the header and is dropped. Any row that cannot be mapped
//! aborts the whole entity type, because a shortened record set would
//! soft-delete rows that still exist upstream.

use tablesync_common::Identifier;
use tracing::warn;

use crate::error::{Result, SyncError};
use crate::record::{FieldValue, Record, RecordSet};
use crate::reference::{ReferenceMap, ReferenceTable};
use crate::source::RawRow;

/// Default separator between the parts of a composite key
pub const DEFAULT_KEY_SEPARATOR: &str = "_";

/// Turns raw rows of one entity type into records for its target table
pub trait EntityMapper: Send + Sync {
    /// Policy name, for logs
    fn policy(&self) -> &'static str;

    /// Target columns the record payload lines up with
    fn payload_columns(&self) -> &[Identifier];

    /// Reference table that must be loaded before mapping, if any
    fn reference(&self) -> Option<&ReferenceTable> {
        None
    }

    fn map_row(&self, row: &RawRow, references: Option<&ReferenceMap>) -> Result<Record>;

    /// Map every row after the header into a record set
    fn map_rows(&self, rows: &[RawRow], references: Option<&ReferenceMap>) -> Result<RecordSet> {
        let mut records = RecordSet::with_capacity(rows.len().saturating_sub(1));

        for row in rows.iter().skip(1) {
            records.insert(self.map_row(row, references)?)?;
        }

        Ok(records)
    }
}

/// Rows need at least `expected` fields; trailing fields are ignored
fn expect_fields(row: &RawRow, expected: usize) -> Result<()> {
    if row.fields.len() < expected {
        return Err(SyncError::malformed(
            row.line,
            format!("expected at least {} fields, found {}", expected, row.fields.len()),
        ));
    }

    if row.fields.len() > expected {
        warn!(
            line = row.line,
            trailing = row.fields.len() - expected,
            "Ignoring trailing fields"
        );
    }

    if row.fields[0].trim().is_empty() {
        return Err(SyncError::malformed(row.line, "empty identifier in first field"));
    }

    Ok(())
}

/// Key = first field, payload = the remaining fields, all verbatim
#[derive(Debug, Clone)]
pub struct DirectMapper {
    payload_columns: Vec<Identifier>,
}

impl DirectMapper {
    pub fn new(payload_columns: Vec<Identifier>) -> Self {
        Self { payload_columns }
    }
}

impl EntityMapper for DirectMapper {
    fn policy(&self) -> &'static str {
        "direct"
    }

    fn payload_columns(&self) -> &[Identifier] {
        &self.payload_columns
    }

    fn map_row(&self, row: &RawRow, _references: Option<&ReferenceMap>) -> Result<Record> {
        let width = self.payload_columns.len() + 1;
        expect_fields(row, width)?;

        let payload = row.fields[1..width]
            .iter()
            .map(|f| FieldValue::Text(f.clone()))
            .collect();

        Ok(Record::new(row.fields[0].clone(), payload, row.line))
    }
}

/// Key = `<natural id><separator><resolved reference id>`.
///
/// Rows are `natural_id,label`; the label is resolved through the reference
/// map and the payload is `(natural_id, reference_id)`.
#[derive(Debug, Clone)]
pub struct CompositeKeyMapper {
    payload_columns: Vec<Identifier>,
    separator: String,
    reference: ReferenceTable,
}

impl CompositeKeyMapper {
    pub fn new(
        natural_column: Identifier,
        reference_column: Identifier,
        separator: impl Into<String>,
        reference: ReferenceTable,
    ) -> Self {
        Self {
            payload_columns: vec![natural_column, reference_column],
            separator: separator.into(),
            reference,
        }
    }
}

impl EntityMapper for CompositeKeyMapper {
    fn policy(&self) -> &'static str {
        "composite_key"
    }

    fn payload_columns(&self) -> &[Identifier] {
        &self.payload_columns
    }

    fn reference(&self) -> Option<&ReferenceTable> {
        Some(&self.reference)
    }

    fn map_row(&self, row: &RawRow, references: Option<&ReferenceMap>) -> Result<Record> {
        let references = references.ok_or_else(|| {
            tablesync_common::TableSyncError::config(format!(
                "composite key mapping needs the {} reference map",
                self.reference.table
            ))
        })?;

        expect_fields(row, 2)?;

        let natural = &row.fields[0];
        let reference_id = references.resolve(&row.fields[1], row.line)?;
        let key = format!("{natural}{}{reference_id}", self.separator);

        Ok(Record::new(
            key,
            vec![
                FieldValue::Text(natural.clone()),
                FieldValue::Integer(reference_id),
            ],
            row.line,
        ))
    }
}
