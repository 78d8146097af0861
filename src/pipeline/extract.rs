//! Spreadsheet → bronze landing.

use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::constants::SHEET_NAMES;
use crate::error::{EtlError, Result};
use crate::observability::metrics;
use crate::schema::schema_for;
use crate::source::SheetSource;
use crate::storage::Warehouse;
use crate::types::{Layer, Table};

pub const STAGE_NAME: &str = "bronze";

/// One landed sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandedSheet {
    pub name: String,
    pub rows: usize,
    pub digest: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    pub source: String,
    pub sheets: Vec<LandedSheet>,
}

impl ExtractReport {
    pub fn rows(&self) -> usize {
        self.sheets.iter().map(|s| s.rows).sum()
    }

    /// `sheet=<sha256>` pairs for the run ledger
    pub fn digests(&self) -> String {
        self.sheets
            .iter()
            .map(|s| format!("{}={}", s.name, s.digest))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct Extractor {
    source: Arc<dyn SheetSource>,
    warehouse: Arc<dyn Warehouse>,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("source", &self.source.describe())
            .field("warehouse", &self.warehouse.backend())
            .finish()
    }
}

impl Extractor {
    pub fn new(source: Arc<dyn SheetSource>, warehouse: Arc<dyn Warehouse>) -> Self {
        Self { source, warehouse }
    }

    /// Fetch and schema-check every sheet, then replace the bronze tables.
    ///
    /// Nothing is written unless every sheet was fetched and conformed.
    #[instrument(skip(self), fields(source = %self.source.describe()))]
    pub async fn run(&self) -> Result<ExtractReport> {
        let mut staged: Vec<(Table, String)> = Vec::with_capacity(SHEET_NAMES.len());
        for name in SHEET_NAMES {
            let schema = schema_for(name)
                .ok_or_else(|| EtlError::Config(format!("no sheet schema for '{}'", name)))?;

            info!("📡 Fetching sheet '{}'...", name);
            let raw = match self.source.fetch_sheet(name).await {
                Ok(raw) => raw,
                Err(e) => {
                    error!("Failed to fetch sheet '{}': {}", name, e);
                    metrics::extract::source_error(name);
                    return Err(e);
                }
            };
            let table = schema.conform(&raw)?;
            debug!(sheet = name, digest = %raw.digest, rows = table.len(), "Sheet conformed");
            staged.push((table, raw.digest));
        }

        let mut report = ExtractReport {
            source: self.source.describe(),
            sheets: Vec::with_capacity(staged.len()),
        };
        for (table, digest) in staged {
            self.warehouse.replace_table(Layer::Bronze, &table).await?;
            metrics::extract::sheet_fetched(&table.name, table.len());
            info!("✅ Landed bronze.{} ({} rows, sha256 {})", table.name, table.len(), digest);
            report.sheets.push(LandedSheet {
                name: table.name.clone(),
                rows: table.len(),
                digest,
            });
        }
        Ok(report)
    }
}
