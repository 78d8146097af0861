//! Spreadsheet sources the extractor can read tabs from.

pub mod csv_dir;
pub mod google_auth;
pub mod google_sheets;

pub use csv_dir::CsvDirectorySource;
pub use google_auth::{ServiceAccountAuth, ServiceAccountKey, SheetsAuth};
pub use google_sheets::GoogleSheetsSource;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{SheetsCredentials, SourceConfig, SourceKind};
use crate::error::Result;
use crate::types::RawSheet;

/// Core trait every spreadsheet source implements
#[async_trait]
pub trait SheetSource: Send + Sync {
    /// Human-readable identifier used in logs and the run ledger
    fn describe(&self) -> String;

    /// Fetch one tab. Connection failures and missing tabs are
    /// `EtlError::SourceUnreachable`.
    async fn fetch_sheet(&self, sheet_name: &str) -> Result<RawSheet>;
}

/// Build the source selected by the configuration.
pub fn from_config(config: &SourceConfig) -> Result<Arc<dyn SheetSource>> {
    match config.kind()? {
        SourceKind::CsvDirectory(dir) => Ok(Arc::new(CsvDirectorySource::new(dir))),
        SourceKind::GoogleSheets { spreadsheet_id } => {
            let client = GoogleSheetsSource::http_client(Duration::from_secs(config.timeout_seconds))?;
            let auth = match config.credentials()? {
                SheetsCredentials::ServiceAccount(path) => {
                    SheetsAuth::ServiceAccount(ServiceAccountAuth::new(
                        ServiceAccountKey::from_file(&path)?,
                        client.clone(),
                    ))
                }
                SheetsCredentials::AccessToken(token) => SheetsAuth::AccessToken(token),
                SheetsCredentials::ApiKey(key) => SheetsAuth::ApiKey(key),
            };
            info!("Authorizing Sheets API requests with {}", auth.describe());
            Ok(Arc::new(GoogleSheetsSource::new(&spreadsheet_id, auth, client)))
        }
    }
}

/// Hex SHA-256 of a fetched payload
pub fn payload_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Parse a CSV export (header row first) into a raw sheet.
pub fn parse_csv(sheet_name: &str, bytes: &[u8]) -> Result<RawSheet> {
    let digest = payload_digest(bytes);

    // Exports may carry a UTF-8 BOM ahead of the first header
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body);

    let headers = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|field| Some(field.to_string())).collect());
    }

    Ok(RawSheet {
        name: sheet_name.to_string(),
        headers,
        rows,
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_with_bom_and_ragged_rows() {
        let body = "\u{feff}customer_id,city\nC1,Pune\nC2\n";
        let sheet = parse_csv("customers", body.as_bytes()).unwrap();

        assert_eq!(sheet.headers, vec!["customer_id", "city"]);
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[1], vec![Some("C2".to_string())]);
        assert_eq!(sheet.digest.len(), 64);
    }

    #[test]
    fn test_digest_tracks_payload() {
        let a = parse_csv("t", b"id\n1\n").unwrap();
        let b = parse_csv("t", b"id\n1\n").unwrap();
        let c = parse_csv("t", b"id\n2\n").unwrap();
        assert_eq!(a.digest, b.digest);
        assert_ne!(a.digest, c.digest);
    }

    #[test]
    fn test_google_source_needs_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SourceConfig {
            spreadsheet_id: Some("sheet-1".to_string()),
            ..SourceConfig::default()
        };
        config.service_account_key = Some(dir.path().join("missing.json"));
        assert!(matches!(from_config(&config), Err(crate::error::EtlError::Config(_))));

        config.service_account_key = None;
        config.api_key = Some("k".to_string());
        assert_eq!(from_config(&config).unwrap().describe(), "google_sheets:sheet-1");
    }
}
