//! Stage orchestration for the bronze → silver → gold job.

pub mod aggregate;
pub mod clean;
pub mod coerce;
pub mod export;
pub mod extract;
pub mod ledger;
pub mod quality;

pub use aggregate::{AggregateReport, Aggregator, GoldTables};
pub use clean::{CleanReport, Cleaner, SilverTables};
pub use export::{ExportedFile, Exporter};
pub use extract::{ExtractReport, Extractor};
pub use ledger::{RunStatus, StageRecord};
pub use quality::{QualityLog, Rejection};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{EtlError, Result};
use crate::observability::metrics;
use crate::source::SheetSource;
use crate::storage::Warehouse;
use crate::types::Layer;

/// A unit of work the CLI can run on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Clean,
    Aggregate,
    Export,
}

impl Stage {
    /// Name recorded in the run ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => extract::STAGE_NAME,
            Stage::Clean => clean::STAGE_NAME,
            Stage::Aggregate => aggregate::STAGE_NAME,
            Stage::Export => export::STAGE_NAME,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stage produced
#[derive(Debug, Clone)]
pub enum StageOutcome {
    Extracted(ExtractReport),
    Cleaned(CleanReport),
    Aggregated(AggregateReport),
    Exported(Vec<ExportedFile>),
}

impl StageOutcome {
    /// (rows_in, rows_out, rows_rejected, detail) for the ledger
    fn ledger_counts(&self) -> (usize, usize, usize, String) {
        match self {
            StageOutcome::Extracted(r) => (r.rows(), r.rows(), 0, format!("{} {}", r.source, r.digests())),
            StageOutcome::Cleaned(r) => (
                r.rows_in(),
                r.rows_out(),
                r.rows_rejected(),
                r.quality
                    .rule_counts()
                    .iter()
                    .map(|c| format!("{}.{}={}", c.table, c.rule, c.rows))
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            StageOutcome::Aggregated(r) => (
                r.silver_rows,
                r.rows_out(),
                0,
                r.tables
                    .iter()
                    .map(|(t, n)| format!("{}={}", t, n))
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            StageOutcome::Exported(files) => {
                let rows: usize = files.iter().map(|f| f.rows).sum();
                let dir = files
                    .first()
                    .and_then(|f| f.path.parent())
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                (rows, rows, 0, dir)
            }
        }
    }
}

/// Result of a full `all` run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub outcomes: Vec<StageOutcome>,
}

impl RunSummary {
    pub fn clean_report(&self) -> Option<&CleanReport> {
        self.outcomes.iter().find_map(|o| match o {
            StageOutcome::Cleaned(r) => Some(r),
            _ => None,
        })
    }
}

/// Runs stages against one warehouse, recording each in the run ledger
pub struct Pipeline {
    warehouse: Arc<dyn Warehouse>,
    source: Option<Arc<dyn SheetSource>>,
    export_dir: Option<PathBuf>,
    run_id: Uuid,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("warehouse", &self.warehouse.backend())
            .field("source", &self.source.as_ref().map(|s| s.describe()))
            .field("export_dir", &self.export_dir)
            .field("run_id", &self.run_id)
            .finish()
    }
}

impl Pipeline {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self {
            warehouse,
            source: None,
            export_dir: None,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn SheetSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    async fn execute(&self, stage: Stage) -> Result<StageOutcome> {
        match stage {
            Stage::Extract => {
                let source = self.source.clone().ok_or_else(|| {
                    EtlError::Config("extract needs a spreadsheet source".to_string())
                })?;
                let report = Extractor::new(source, self.warehouse.clone()).run().await?;
                Ok(StageOutcome::Extracted(report))
            }
            Stage::Clean => {
                let report = Cleaner::new(self.warehouse.clone()).run(self.run_id).await?;
                Ok(StageOutcome::Cleaned(report))
            }
            Stage::Aggregate => {
                let report = Aggregator::new(self.warehouse.clone()).run().await?;
                Ok(StageOutcome::Aggregated(report))
            }
            Stage::Export => {
                let dir = self.export_dir.clone().ok_or_else(|| {
                    EtlError::Config("export needs --export-dir or ETL_EXPORT_DIR".to_string())
                })?;
                let files = Exporter::new(self.warehouse.clone(), dir).run().await?;
                Ok(StageOutcome::Exported(files))
            }
        }
    }

    /// Run one stage and append its ledger row. A failed stage is still
    /// recorded; a ledger write failure is logged and never masks the
    /// stage's own result.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run_stage(&self, stage: Stage) -> Result<StageOutcome> {
        let mut record = StageRecord::start(self.run_id, stage.as_str());
        let result = self.execute(stage).await;

        match &result {
            Ok(outcome) => {
                let (rows_in, rows_out, rejected, detail) = outcome.ledger_counts();
                record.succeed(rows_in, rows_out, rejected, detail);
            }
            Err(e) => {
                error!("❌ Stage {} failed: {}", stage, e);
                metrics::stage::failed(stage.as_str(), e.kind());
                record.fail(format!("{}: {}", e.kind(), e));
            }
        }
        metrics::stage::duration(stage.as_str(), record.elapsed_secs());

        if let Err(e) = self.warehouse.append_rows(Layer::Audit, &record.to_table()).await {
            warn!("Could not record stage {} in the run ledger: {}", stage, e);
        }
        result
    }

    /// Extract, clean and aggregate, then export when an export directory
    /// is configured. Stops at the first failing stage.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run_all(&self) -> Result<RunSummary> {
        info!("🚀 Starting ETL run {} on {}", self.run_id, self.warehouse.backend());
        println!("🚀 Starting ETL run {}", self.run_id);

        let mut stages = vec![Stage::Extract, Stage::Clean, Stage::Aggregate];
        if self.export_dir.is_some() {
            stages.push(Stage::Export);
        }

        let mut outcomes = Vec::with_capacity(stages.len());
        for stage in stages {
            let outcome = self.run_stage(stage).await?;
            print_outcome(&outcome);
            outcomes.push(outcome);
        }

        info!("🎉 ETL run {} complete", self.run_id);
        println!("🎉 ETL run complete");
        Ok(RunSummary {
            run_id: self.run_id,
            outcomes,
        })
    }
}

/// One-line console summary of a finished stage
pub fn print_outcome(outcome: &StageOutcome) {
    match outcome {
        StageOutcome::Extracted(r) => {
            println!("📡 Extracted {} sheets ({} rows) from {}", r.sheets.len(), r.rows(), r.source);
        }
        StageOutcome::Cleaned(r) => {
            println!(
                "🧹 Cleaned: {} in, {} out, {} rejected",
                r.rows_in(),
                r.rows_out(),
                r.rows_rejected()
            );
            for c in r.quality.rule_counts() {
                println!("   [DQ] {} | {} | {} | rejected_rows={}", c.table, c.rule, c.reason, c.rows);
            }
        }
        StageOutcome::Aggregated(r) => {
            println!("📊 Built {} gold tables ({} rows)", r.tables.len(), r.rows_out());
        }
        StageOutcome::Exported(files) => {
            for f in files {
                println!("💾 {} → {}", f.table, f.path.display());
            }
        }
    }
}
