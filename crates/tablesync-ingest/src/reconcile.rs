//! Delta reconciliation of a record set against a target table
//!
//! `upsert_all` inserts new keys, rewrites changed or soft-deleted rows and
//! leaves unchanged active rows alone. `soft_delete_missing` then marks every
//! active row whose key is absent from the set. Both run on the caller's
//! connection, which is expected to be inside the entity's transaction.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tablesync_common::TableSyncError;
use tracing::{debug, info};

use crate::error::Result;
use crate::record::{FieldValue, Record, RecordSet};
use crate::table::TargetTable;

/// Default number of records per upsert statement
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Bind parameters PostgreSQL accepts in a single statement
pub const POSTGRES_MAX_BIND_PARAMS: usize = 65_535;

/// How absent keys get soft-deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoftDeletePlan {
    /// Empty snapshot: every active row goes
    AllActive,
    /// Every active row whose key is not listed goes
    Excluding(Vec<String>),
}

impl SoftDeletePlan {
    pub fn for_records(records: &RecordSet) -> Self {
        if records.is_empty() {
            SoftDeletePlan::AllActive
        } else {
            SoftDeletePlan::Excluding(records.keys())
        }
    }
}

/// Batch partition and soft-delete shape for one record set
#[derive(Debug, Clone)]
pub struct ReconcilePlan<'a> {
    pub batches: Vec<&'a [Record]>,
    pub soft_delete: SoftDeletePlan,
}

/// Counts for one reconciled entity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Records in the snapshot
    pub seen: usize,
    pub inserted: u64,
    /// Existing rows rewritten: payload changed, resurrected, or both
    pub modified: u64,
    pub soft_deleted: u64,
    /// Upsert statements issued
    pub batches: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    batch_size: usize,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Reconciler {
    pub fn new(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(TableSyncError::config("batch size must be greater than 0").into());
        }
        Ok(Self { batch_size })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Configured batch size, clamped so one statement stays under the bind limit
    pub fn effective_batch_size(&self, table: &TargetTable) -> usize {
        // One extra parameter carries the run timestamp in the conflict clause
        let max_rows = (POSTGRES_MAX_BIND_PARAMS - 1) / table.params_per_row();
        self.batch_size.min(max_rows).max(1)
    }

    /// Partition the records into upsert batches and pick the soft-delete shape
    pub fn plan<'a>(&self, table: &TargetTable, records: &'a RecordSet) -> Result<ReconcilePlan<'a>> {
        let width = table.payload_columns().len();
        if let Some(record) = records.iter().find(|r| r.payload.len() != width) {
            return Err(TableSyncError::config(format!(
                "record '{}' from line {} has {} payload values, {} expects {}",
                record.key,
                record.line,
                record.payload.len(),
                table.name(),
                width
            ))
            .into());
        }

        let batches = records
            .as_slice()
            .chunks(self.effective_batch_size(table))
            .collect();

        Ok(ReconcilePlan {
            batches,
            soft_delete: SoftDeletePlan::for_records(records),
        })
    }

    /// Apply the record set: upserts first, then soft-deletes
    pub async fn reconcile(
        &self,
        conn: &mut PgConnection,
        table: &TargetTable,
        records: &RecordSet,
        now: DateTime<Utc>,
    ) -> Result<ReconcileStats> {
        let mut stats = self.upsert_all(&mut *conn, table, records, now).await?;
        stats.soft_deleted = self.soft_delete_missing(&mut *conn, table, records, now).await?;

        info!(
            table = %table.name(),
            seen = stats.seen,
            inserted = stats.inserted,
            modified = stats.modified,
            soft_deleted = stats.soft_deleted,
            batches = stats.batches,
            "Reconciled table"
        );

        Ok(stats)
    }

    /// Upsert every record, without soft-deleting anything.
    ///
    /// Returns the counts with `soft_deleted` left at zero.
    pub async fn upsert_all(
        &self,
        conn: &mut PgConnection,
        table: &TargetTable,
        records: &RecordSet,
        now: DateTime<Utc>,
    ) -> Result<ReconcileStats> {
        let plan = self.plan(table, records)?;
        let mut stats = ReconcileStats {
            seen: records.len(),
            batches: plan.batches.len(),
            ..Default::default()
        };

        for (index, batch) in plan.batches.iter().enumerate() {
            let (inserted, modified) = upsert_batch(&mut *conn, table, batch, now).await?;
            debug!(
                table = %table.name(),
                batch = index + 1,
                total = plan.batches.len(),
                rows = batch.len(),
                inserted,
                modified,
                "Upserted batch"
            );
            stats.inserted += inserted;
            stats.modified += modified;
        }

        Ok(stats)
    }

    /// Soft-delete every active row whose key is not in `records`
    pub async fn soft_delete_missing(
        &self,
        conn: &mut PgConnection,
        table: &TargetTable,
        records: &RecordSet,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = match SoftDeletePlan::for_records(records) {
            SoftDeletePlan::AllActive => {
                sqlx::query(&table.soft_delete_all_sql())
                    .bind(now)
                    .execute(&mut *conn)
                    .await?
            },
            SoftDeletePlan::Excluding(keys) => {
                sqlx::query(&table.soft_delete_excluding_sql())
                    .bind(now)
                    .bind(keys)
                    .execute(&mut *conn)
                    .await?
            },
        };

        Ok(result.rows_affected())
    }
}

/// One multi-row upsert. Returns (inserted, modified).
async fn upsert_batch(
    conn: &mut PgConnection,
    table: &TargetTable,
    batch: &[Record],
    now: DateTime<Utc>,
) -> Result<(u64, u64)> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(table.insert_prefix());

    builder.push_values(batch, |mut b, record| {
        b.push_bind(record.key.as_str());
        for value in &record.payload {
            match value {
                FieldValue::Text(text) => {
                    b.push_bind(text.as_str());
                },
                FieldValue::Integer(number) => {
                    b.push_bind(*number);
                },
            }
        }
        b.push_bind(now);
    });

    builder.push(table.upsert_conflict_head());
    builder.push_bind(now);
    builder.push(table.upsert_suffix());

    // Untouched rows return nothing; the rest report whether they were new
    let written: Vec<bool> = builder
        .build_query_scalar::<bool>()
        .fetch_all(&mut *conn)
        .await?;

    let inserted = written.iter().filter(|&&new| new).count() as u64;
    Ok((inserted, written.len() as u64 - inserted))
}
