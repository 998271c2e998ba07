//! Run coordinator: fetch -> map -> reconcile, one entity type at a time
//!
//! Failures are caught at the entity boundary. Each entity type gets its own
//! transaction, so a failed one leaves its table as it was and the run moves
//! on to the next.

use chrono::Utc;
use sqlx::PgPool;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::SyncConfig;
use crate::entity::EntityPipeline;
use crate::error::{Result, SyncError};
use crate::reconcile::{ReconcileStats, Reconciler};
use crate::reference::ReferenceMap;
use crate::source::RowSource;

/// Result of syncing one entity type
#[derive(Debug)]
pub struct EntityOutcome {
    pub entity: String,
    pub table: String,
    pub result: Result<ReconcileStats>,
    pub elapsed: Duration,
}

impl EntityOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&SyncError> {
        self.result.as_ref().err()
    }
}

/// Per-entity outcomes of one run, in configured order
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<EntityOutcome>,
    pub dry_run: bool,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| !o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &EntityOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &EntityOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }
}

pub struct RunCoordinator {
    pool: PgPool,
    source: RowSource,
    reconciler: Reconciler,
    pipelines: Vec<EntityPipeline>,
    dry_run: bool,
}

impl RunCoordinator {
    pub fn new(
        pool: PgPool,
        source: RowSource,
        reconciler: Reconciler,
        pipelines: Vec<EntityPipeline>,
    ) -> Self {
        Self {
            pool,
            source,
            reconciler,
            pipelines,
            dry_run: false,
        }
    }

    /// Build a coordinator for the configured entity types, or only the named ones
    pub fn from_config(pool: PgPool, config: &SyncConfig, only: &[String]) -> anyhow::Result<Self> {
        let pipelines = EntityPipeline::all(config, only)?;
        let source = RowSource::new(config.fetch_timeout())?;
        let reconciler = Reconciler::new(config.batch_size)?;

        Ok(Self::new(pool, source, reconciler, pipelines))
    }

    /// Reconcile inside the transaction, then roll it back
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn pipelines(&self) -> &[EntityPipeline] {
        &self.pipelines
    }

    /// Sync every entity type in order. Never stops early.
    pub async fn run(&self) -> RunReport {
        info!(
            entities = self.pipelines.len(),
            batch_size = self.reconciler.batch_size(),
            dry_run = self.dry_run,
            "Starting sync run"
        );

        let mut report = RunReport {
            outcomes: Vec::with_capacity(self.pipelines.len()),
            dry_run: self.dry_run,
        };

        for pipeline in &self.pipelines {
            let span = info_span!("entity", entity = %pipeline.name, table = %pipeline.table.name());
            let started = Instant::now();
            let result = self.sync_entity(pipeline).instrument(span).await;
            let elapsed = started.elapsed();

            match &result {
                Ok(stats) => info!(
                    entity = %pipeline.name,
                    inserted = stats.inserted,
                    modified = stats.modified,
                    soft_deleted = stats.soft_deleted,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Entity synchronized"
                ),
                Err(e) => error!(
                    entity = %pipeline.name,
                    kind = e.kind(),
                    error = %e,
                    "Entity sync failed"
                ),
            }

            report.outcomes.push(EntityOutcome {
                entity: pipeline.name.clone(),
                table: pipeline.table.name().to_string(),
                result,
                elapsed,
            });
        }

        info!(
            succeeded = report.succeeded().count(),
            failed = report.failed().count(),
            "Sync run finished"
        );

        report
    }

    /// Fetch, map and reconcile one entity type as a single unit of work
    pub async fn sync_entity(&self, pipeline: &EntityPipeline) -> Result<ReconcileStats> {
        // Fetch before taking a connection; a slow source must not hold one
        let rows = self.source.fetch_rows(&pipeline.location).await?;

        let mut tx = self.pool.begin().await?;

        let references = match pipeline.mapper.reference() {
            Some(reference) => Some(ReferenceMap::load(&mut *tx, reference).await?),
            None => None,
        };

        let records = pipeline.mapper.map_rows(&rows, references.as_ref())?;
        debug!(
            policy = pipeline.mapper.policy(),
            rows = rows.len(),
            records = records.len(),
            "Mapped source rows"
        );

        let stats = self
            .reconciler
            .reconcile(&mut *tx, &pipeline.table, &records, Utc::now())
            .await?;

        if self.dry_run {
            tx.rollback().await?;
            info!("Dry run, changes rolled back");
        } else {
            tx.commit().await?;
        }

        Ok(stats)
    }
}
