use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument};

use super::aggregate::gold_columns;
use crate::constants::GOLD_TABLES;
use crate::error::{EtlError, Result};
use crate::storage::{read_conforming, Warehouse};
use crate::types::{Layer, Table};

pub const STAGE_NAME: &str = "export";

/// One exported gold table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub table: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// Writes a table as CSV with a header row. Nulls are empty fields.
pub fn write_csv(table: &Table, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(table.columns.iter().map(|c| c.name.as_str()))?;
    for row in &table.rows {
        writer.write_record(row.iter().map(|v| v.render()))?;
    }
    writer.flush()?;
    Ok(())
}

/// Dumps every gold table to `{dir}/{table}.csv`
pub struct Exporter {
    warehouse: Arc<dyn Warehouse>,
    dir: PathBuf,
}

impl Exporter {
    pub fn new(warehouse: Arc<dyn Warehouse>, dir: impl Into<PathBuf>) -> Self {
        Self {
            warehouse,
            dir: dir.into(),
        }
    }

    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn run(&self) -> Result<Vec<ExportedFile>> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut files = Vec::with_capacity(GOLD_TABLES.len());
        for name in GOLD_TABLES {
            let columns = gold_columns(name)
                .ok_or_else(|| EtlError::Config(format!("no column layout for gold table '{}'", name)))?;
            if self.warehouse.table_columns(Layer::Gold, name).await?.is_none() {
                return Err(EtlError::NotBuilt {
                    table: format!("{}.{}", Layer::Gold, name),
                    stage: "aggregate",
                });
            }
            let table = read_conforming(self.warehouse.as_ref(), Layer::Gold, name, &columns, &[]).await?;

            let path = self.dir.join(format!("{}.csv", name));
            write_csv(&table, &path)?;
            info!("💾 Exported gold.{} ({} rows) to {}", name, table.len(), path.display());
            files.push(ExportedFile {
                table: name.to_string(),
                path,
                rows: table.len(),
            });
        }
        Ok(files)
    }
}
