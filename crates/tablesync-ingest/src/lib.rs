//! TableSync Ingest Library
//!
//! Keeps relational tables in step with CSV snapshots. Every run inserts new
//! keys, updates changed rows, soft-deletes rows that left the snapshot and
//! resurrects rows that came back.
//!
//! # Pipeline
//!
//! - [`source`]: streams raw rows from an HTTP URL or a local file
//! - [`mapper`]: turns rows into keyed records (direct or composite-key policy)
//! - [`reconcile`]: batched upserts and soft-deletes against the target table
//! - [`coordinator`]: runs each configured entity type in its own transaction
//!
//! # Example
//!
//! ```no_run
//! use tablesync_ingest::{db, RunCoordinator, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SyncConfig::load(None)?;
//!     let pool = db::create_pool(&config.database).await?;
//!
//!     let report = RunCoordinator::from_config(pool, &config, &[])?.run().await;
//!     for outcome in report.failed() {
//!         eprintln!("{} failed", outcome.entity);
//!     }
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod coordinator;
pub mod db;
pub mod entity;
pub mod error;
pub mod mapper;
pub mod reconcile;
pub mod record;
pub mod reference;
pub mod source;
pub mod table;

pub use config::{EntityConfig, MappingConfig, SyncConfig};
pub use coordinator::{EntityOutcome, RunCoordinator, RunReport};
pub use entity::EntityPipeline;
pub use error::{Result, SyncError};
pub use mapper::{CompositeKeyMapper, DirectMapper, EntityMapper};
pub use reconcile::{ReconcileStats, Reconciler};
pub use record::{FieldValue, Record, RecordSet};
pub use reference::{ReferenceMap, ReferenceTable};
pub use source::{RawRow, RowSource};
pub use table::TargetTable;
