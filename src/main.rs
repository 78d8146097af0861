use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};

use sheets_etl::config::EtlConfig;
use sheets_etl::logging;
use sheets_etl::observability::metrics;
use sheets_etl::pipeline::{print_outcome, Pipeline, Stage};
use sheets_etl::{source, storage};

#[derive(Parser)]
#[command(name = "etl")]
#[command(about = "Spreadsheet to warehouse ETL: bronze, silver and gold layers")]
#[command(version)]
struct Cli {
    /// TOML config file (defaults to ./etl.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run extract, clean and aggregate, then export if a directory is set
    All {
        /// Write gold tables as CSV into this directory
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
    /// Land every spreadsheet tab in the bronze layer
    Extract,
    /// Clean bronze into silver and log rejected rows
    Clean,
    /// Build the gold tables from silver
    Aggregate,
    /// Write the gold tables as CSV files
    Export {
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = EtlConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = logging::init_logging(&config.logging);
    info!("Loaded configuration: {:?}", config.database);
    let metrics_exporter = metrics::install(&config.metrics).context("Failed to initialize metrics")?;

    let warehouse = storage::connect(&config.database)
        .await
        .context("Failed to open the warehouse")?;

    let export_dir = match &cli.command {
        Commands::All { export_dir } | Commands::Export { export_dir } => {
            export_dir.clone().or_else(|| config.export.dir.clone())
        }
        _ => None,
    };

    let mut pipeline = Pipeline::new(warehouse);
    if let Some(dir) = export_dir {
        pipeline = pipeline.with_export_dir(dir);
    }
    if matches!(cli.command, Commands::All { .. } | Commands::Extract) {
        let source = source::from_config(&config.source).context("Failed to set up the spreadsheet source")?;
        info!("Reading spreadsheets from {}", source.describe());
        pipeline = pipeline.with_source(source);
    }

    let result = match cli.command {
        Commands::All { .. } => pipeline.run_all().await.map(|_| ()),
        Commands::Extract => run_one(&pipeline, Stage::Extract).await,
        Commands::Clean => run_one(&pipeline, Stage::Clean).await,
        Commands::Aggregate => run_one(&pipeline, Stage::Aggregate).await,
        Commands::Export { .. } => run_one(&pipeline, Stage::Export).await,
    };

    if let Err(e) = &result {
        error!("ETL run {} failed: {}", pipeline.run_id(), e);
        println!("❌ ETL run failed: {}", e);
    }

    // A failed push never changes the run's outcome
    if let Err(e) = metrics_exporter.push(&pipeline.run_id().to_string()).await {
        warn!("Could not push metrics: {}", e);
    }
    result.with_context(|| format!("ETL run {} failed", pipeline.run_id()))
}

async fn run_one(pipeline: &Pipeline, stage: Stage) -> sheets_etl::error::Result<()> {
    println!("🔄 Running {} stage...", stage);
    let outcome = pipeline.run_stage(stage).await?;
    print_outcome(&outcome);
    Ok(())
}
