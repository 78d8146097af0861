use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{parse_csv, SheetSource};
use crate::error::{EtlError, Result};
use crate::types::RawSheet;

/// Reads each tab from `<dir>/<sheet>.csv`, e.g. a "Download as CSV" dump
/// of the workbook.
pub struct CsvDirectorySource {
    dir: PathBuf,
}

impl CsvDirectorySource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn sheet_path(&self, sheet_name: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", sheet_name))
    }
}

#[async_trait]
impl SheetSource for CsvDirectorySource {
    fn describe(&self) -> String {
        format!("csv_dir:{}", self.dir.display())
    }

    async fn fetch_sheet(&self, sheet_name: &str) -> Result<RawSheet> {
        let path = self.sheet_path(sheet_name);
        debug!("Reading {}", path.display());
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            EtlError::SourceUnreachable(format!("{}: {}", path.display(), e))
        })?;
        parse_csv(sheet_name, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_reads_sheet_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("products.csv"), "product_id,brand\nP1,Acme\n").unwrap();

        let source = CsvDirectorySource::new(dir.path());
        let sheet = source.fetch_sheet("products").await.unwrap();
        assert_eq!(sheet.name, "products");
        assert_eq!(sheet.rows, vec![vec![Some("P1".to_string()), Some("Acme".to_string())]]);
    }

    #[tokio::test]
    async fn test_missing_file_is_source_unreachable() {
        let dir = tempdir().unwrap();
        let source = CsvDirectorySource::new(dir.path());
        let err = source.fetch_sheet("orders").await.unwrap_err();
        assert!(matches!(err, EtlError::SourceUnreachable(_)));
    }
}
