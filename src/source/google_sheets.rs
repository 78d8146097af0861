use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use super::google_auth::SheetsAuth;
use super::{payload_digest, SheetSource};
use crate::error::{EtlError, Result};
use crate::types::RawSheet;

const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Response body of `spreadsheets.values.get`
#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Reads tabs through the Sheets API `values.get` endpoint.
///
/// Cells come back as the sheet displays them (`FORMATTED_VALUE`), with no
/// per-column type guessing, so bronze holds exactly what was typed.
pub struct GoogleSheetsSource {
    client: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    auth: SheetsAuth,
}

impl GoogleSheetsSource {
    pub fn new(spreadsheet_id: &str, auth: SheetsAuth, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            auth,
        }
    }

    pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(timeout).build()?)
    }

    /// Point at a different host, e.g. a local mirror.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn values_url(&self, sheet_name: &str) -> String {
        format!(
            "{}/{}/values/{}?valueRenderOption=FORMATTED_VALUE&majorDimension=ROWS",
            self.base_url, self.spreadsheet_id, sheet_name
        )
    }
}

/// Header row plus data rows from a `values.get` body. Trailing empty
/// cells are omitted by the API; rows stay ragged here.
pub fn parse_value_range(sheet_name: &str, body: &[u8]) -> Result<RawSheet> {
    let range: ValueRange = serde_json::from_slice(body)?;
    let mut rows = range.values.into_iter().map(|row| {
        row.into_iter()
            .map(|cell| match cell {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s),
                other => Some(other.to_string()),
            })
            .collect::<Vec<Option<String>>>()
    });

    let headers = rows
        .next()
        .map(|h| h.into_iter().map(|c| c.unwrap_or_default()).collect())
        .unwrap_or_default();

    Ok(RawSheet {
        name: sheet_name.to_string(),
        headers,
        rows: rows.collect(),
        digest: payload_digest(body),
    })
}

#[async_trait]
impl SheetSource for GoogleSheetsSource {
    fn describe(&self) -> String {
        format!("google_sheets:{}", self.spreadsheet_id)
    }

    #[instrument(skip(self), fields(spreadsheet = %self.spreadsheet_id))]
    async fn fetch_sheet(&self, sheet_name: &str) -> Result<RawSheet> {
        let url = self.values_url(sheet_name);
        debug!("GET {} ({})", url, self.auth.describe());

        let request = self.auth.authorize(self.client.get(&url)).await?;
        let resp = request.send().await.map_err(|e| {
            EtlError::SourceUnreachable(format!("sheet '{}': {}", sheet_name, e))
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EtlError::SourceUnreachable(format!(
                "sheet '{}': HTTP {} (is the spreadsheet shared with the configured account?)",
                sheet_name,
                status.as_u16()
            )));
        }

        let bytes = resp.bytes().await.map_err(|e| {
            EtlError::SourceUnreachable(format!("sheet '{}': {}", sheet_name, e))
        })?;
        parse_value_range(sheet_name, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(base: &str) -> GoogleSheetsSource {
        let client = GoogleSheetsSource::http_client(Duration::from_secs(5)).unwrap();
        GoogleSheetsSource::new("abc123", SheetsAuth::ApiKey("k".to_string()), client).with_base_url(base)
    }

    #[test]
    fn test_values_url() {
        let source = source("http://localhost:9999/v4/spreadsheets/");
        assert_eq!(
            source.values_url("orders"),
            "http://localhost:9999/v4/spreadsheets/abc123/values/orders\
             ?valueRenderOption=FORMATTED_VALUE&majorDimension=ROWS"
        );
        assert_eq!(source.describe(), "google_sheets:abc123");
    }

    #[test]
    fn test_mixed_columns_keep_every_cell_as_typed() {
        let body = br#"{
            "range": "customers!A1:Z1000",
            "majorDimension": "ROWS",
            "values": [
                ["customer_id", "age", "city"],
                ["101", "34", "Pune"],
                ["C12", "n/a"],
                ["102", "", "Delhi"]
            ]
        }"#;
        let sheet = parse_value_range("customers", body).unwrap();

        assert_eq!(sheet.headers, vec!["customer_id", "age", "city"]);
        assert_eq!(sheet.rows.len(), 3);
        assert_eq!(sheet.rows[1], vec![Some("C12".to_string()), Some("n/a".to_string())]);
        assert_eq!(sheet.rows[2][1], Some(String::new()));
        assert_eq!(sheet.digest.len(), 64);
    }

    #[test]
    fn test_empty_tab_has_no_headers() {
        let sheet = parse_value_range("delivery", br#"{"range": "delivery!A1:Z1000"}"#).unwrap();
        assert!(sheet.headers.is_empty());
        assert!(sheet.rows.is_empty());
    }

    #[tokio::test]
    async fn test_connection_refused_is_source_unreachable() {
        // Port 1 on loopback has no listener
        let err = source("http://127.0.0.1:1").fetch_sheet("customers").await.unwrap_err();
        assert!(matches!(err, EtlError::SourceUnreachable(_)), "got {:?}", err);
    }
}
