//! Metrics for the ETL stages, recorded through the `metrics` facade.
//!
//! The binary installs a Prometheus recorder with [`install`] and pushes the
//! rendered text to a Pushgateway when the run ends. Library users that
//! install nothing get no-op calls.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::config::MetricsConfig;
use crate::error::{EtlError, Result};

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Extract
    ExtractSheetsFetched,
    ExtractRowsLanded,
    ExtractSourceErrors,

    // Clean
    CleanRowsIn,
    CleanRowsOut,
    CleanRowsRejected,

    // Aggregate
    AggregateRowsWritten,

    // Any stage
    StageDuration,
    StageFailures,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ExtractSheetsFetched => "etl_extract_sheets_fetched_total",
            MetricName::ExtractRowsLanded => "etl_extract_rows_landed_total",
            MetricName::ExtractSourceErrors => "etl_extract_source_errors_total",
            MetricName::CleanRowsIn => "etl_clean_rows_in_total",
            MetricName::CleanRowsOut => "etl_clean_rows_out_total",
            MetricName::CleanRowsRejected => "etl_clean_rows_rejected_total",
            MetricName::AggregateRowsWritten => "etl_aggregate_rows_written_total",
            MetricName::StageDuration => "etl_stage_duration_seconds",
            MetricName::StageFailures => "etl_stage_failures_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub mod extract {
    use super::MetricName;

    pub fn sheet_fetched(sheet: &str, rows: usize) {
        ::metrics::counter!(MetricName::ExtractSheetsFetched.as_str(), "sheet" => sheet.to_string()).increment(1);
        ::metrics::counter!(MetricName::ExtractRowsLanded.as_str(), "sheet" => sheet.to_string())
            .increment(rows as u64);
    }

    pub fn source_error(sheet: &str) {
        ::metrics::counter!(MetricName::ExtractSourceErrors.as_str(), "sheet" => sheet.to_string()).increment(1);
    }
}

pub mod clean {
    use super::MetricName;

    pub fn table_cleaned(table: &str, rows_in: usize, rows_out: usize) {
        ::metrics::counter!(MetricName::CleanRowsIn.as_str(), "table" => table.to_string()).increment(rows_in as u64);
        ::metrics::counter!(MetricName::CleanRowsOut.as_str(), "table" => table.to_string())
            .increment(rows_out as u64);
    }

    pub fn rows_rejected(table: &str, rule: &str, count: usize) {
        ::metrics::counter!(
            MetricName::CleanRowsRejected.as_str(),
            "table" => table.to_string(),
            "rule" => rule.to_string()
        )
        .increment(count as u64);
    }
}

pub mod aggregate {
    use super::MetricName;

    pub fn table_written(table: &str, rows: usize) {
        ::metrics::counter!(MetricName::AggregateRowsWritten.as_str(), "table" => table.to_string())
            .increment(rows as u64);
    }
}

pub mod stage {
    use super::MetricName;

    pub fn duration(stage: &str, secs: f64) {
        ::metrics::histogram!(MetricName::StageDuration.as_str(), "stage" => stage.to_string()).record(secs);
    }

    pub fn failed(stage: &str, kind: &str) {
        ::metrics::counter!(
            MetricName::StageFailures.as_str(),
            "stage" => stage.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }
}

/// Installed recorder plus where to push its contents
pub struct MetricsExporter {
    handle: PrometheusHandle,
    pushgateway_url: Option<String>,
    job: String,
}

/// Install the process-wide Prometheus recorder.
pub fn install(config: &MetricsConfig) -> Result<MetricsExporter> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| EtlError::Metrics(format!("Failed to install Prometheus recorder: {}", e)))?;

    match &config.pushgateway_url {
        Some(url) => info!("Metrics system initialized, pushing to {}", url),
        None => info!("Metrics system initialized (no push gateway)"),
    }
    Ok(MetricsExporter {
        handle,
        pushgateway_url: config.pushgateway_url.clone(),
        job: config.job.clone(),
    })
}

/// `{base}/metrics/job/{job}/instance/{instance}`
pub fn push_url(base: &str, job: &str, instance: &str) -> String {
    format!("{}/metrics/job/{}/instance/{}", base.trim_end_matches('/'), job, instance)
}

impl MetricsExporter {
    /// Prometheus text exposition of everything recorded so far
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// PUT the rendered metrics to the Pushgateway, replacing this
    /// instance's group. Returns `false` when no gateway is configured.
    pub async fn push(&self, instance: &str) -> Result<bool> {
        let base = match &self.pushgateway_url {
            Some(base) => base,
            None => return Ok(false),
        };
        let url = push_url(base, &self.job, instance);
        let body = self.render();
        info!("pushgateway: pushing {} bytes to {}", body.len(), url);

        let resp = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EtlError::Metrics(format!(
                "pushgateway {} answered HTTP {}",
                url,
                resp.status().as_u16()
            )));
        }
        Ok(true)
    }
}
