//! TableSync - CSV to database reconciliation tool

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tablesync_common::logging::{init_logging, LogConfig, LogLevel};
use tablesync_ingest::{db, EntityPipeline, RunCoordinator, SyncConfig};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tablesync")]
#[command(author, version, about = "Reconcile database tables with CSV snapshots")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long, env = "TABLESYNC_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Synchronize entity types from their sources
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Only sync these entity types (repeatable)
        #[arg(short, long = "entity")]
        entities: Vec<String>,

        /// Override the configured batch size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Reconcile, report, then roll back
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply database migrations
    Migrate {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Load and validate configuration, then print the dispatch table
    CheckConfig {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tablesync")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            return ExitCode::from(2);
        },
    };

    match execute(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("tablesync failed: {e:#}");
            ExitCode::from(2)
        },
    }
}

/// Returns whether every entity type succeeded
async fn execute(command: Command) -> Result<bool> {
    match command {
        Command::Run {
            config,
            entities,
            batch_size,
            dry_run,
        } => {
            let mut config = SyncConfig::load(config.config.as_deref())?;
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
                config.validate()?;
            }

            let pool = db::create_pool(&config.database).await?;
            db::health_check(&pool).await?;

            let coordinator =
                RunCoordinator::from_config(pool, &config, &entities)?.with_dry_run(dry_run);

            let report = coordinator.run().await;
            if report.has_failures() {
                let failed: Vec<&str> = report.failed().map(|o| o.entity.as_str()).collect();
                error!(failed = ?failed, "Sync run finished with failures");
            }

            Ok(!report.has_failures())
        },
        Command::Migrate { config } => {
            let config = SyncConfig::load(config.config.as_deref())?;
            let pool = db::create_pool(&config.database).await?;
            db::health_check(&pool).await?;

            info!("Applying migrations");
            sqlx::migrate!("../../migrations").run(&pool).await?;
            info!("Migrations applied");
            Ok(true)
        },
        Command::CheckConfig { config } => {
            let config = SyncConfig::load(config.config.as_deref())?;
            let pipelines = EntityPipeline::all(&config, &[])?;

            info!(
                source_base = %config.source_base,
                batch_size = config.batch_size,
                entities = pipelines.len(),
                "Configuration is valid"
            );
            for pipeline in &pipelines {
                info!(
                    entity = %pipeline.name,
                    location = %pipeline.location,
                    table = %pipeline.table.name(),
                    policy = pipeline.mapper.policy(),
                    "Entity type"
                );
            }
            Ok(true)
        },
    }
}
