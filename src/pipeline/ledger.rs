//! Run ledger: one `audit.pipeline_runs` row per stage execution.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::constants::PIPELINE_RUNS;
use crate::types::{Column, ColumnType, Table, Value};

/// Outcome of a stage execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

/// A single stage execution within a run
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub run_id: Uuid,
    pub stage: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: Option<RunStatus>,
    pub rows_in: usize,
    pub rows_out: usize,
    pub rows_rejected: usize,
    pub detail: String,
}

impl StageRecord {
    pub fn start(run_id: Uuid, stage: &str) -> Self {
        Self {
            run_id,
            stage: stage.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: None,
            rows_in: 0,
            rows_out: 0,
            rows_rejected: 0,
            detail: String::new(),
        }
    }

    pub fn succeed(&mut self, rows_in: usize, rows_out: usize, rows_rejected: usize, detail: String) {
        self.rows_in = rows_in;
        self.rows_out = rows_out;
        self.rows_rejected = rows_rejected;
        self.detail = detail;
        self.finish(RunStatus::Succeeded);
    }

    pub fn fail(&mut self, detail: String) {
        self.detail = detail;
        self.finish(RunStatus::Failed);
    }

    fn finish(&mut self, status: RunStatus) {
        self.status = Some(status);
        self.finished_at = Some(Utc::now());
    }

    pub fn elapsed_secs(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn columns() -> Vec<Column> {
        vec![
            Column::new("run_id", ColumnType::Text),
            Column::new("stage", ColumnType::Text),
            Column::new("started_at", ColumnType::Timestamp),
            Column::new("finished_at", ColumnType::Timestamp),
            Column::new("status", ColumnType::Text),
            Column::new("rows_in", ColumnType::Integer),
            Column::new("rows_out", ColumnType::Integer),
            Column::new("rows_rejected", ColumnType::Integer),
            Column::new("detail", ColumnType::Text),
        ]
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new(PIPELINE_RUNS, Self::columns());
        table.push_row(vec![
            Value::Text(self.run_id.to_string()),
            Value::Text(self.stage.clone()),
            Value::Timestamp(self.started_at),
            self.finished_at.map(Value::Timestamp).unwrap_or(Value::Null),
            self.status
                .map(|s| Value::Text(s.as_str().to_string()))
                .unwrap_or(Value::Null),
            Value::Integer(self.rows_in as i64),
            Value::Integer(self.rows_out as i64),
            Value::Integer(self.rows_rejected as i64),
            Value::Text(self.detail.clone()),
        ]);
        table
    }
}
