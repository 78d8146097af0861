//! Rejected-row bookkeeping and the `audit.rejected_rows` table.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

use crate::constants::REJECTED_ROWS;
use crate::observability::metrics;
use crate::types::{Column, ColumnType, Table, Value};

/// A row that failed a cleaning rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub table: String,
    pub rule: String,
    pub reason: String,
    /// The offending bronze row
    pub row_data: serde_json::Value,
}

/// Per-(table, rule) rejection count with one sample reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCount {
    pub table: String,
    pub rule: String,
    pub reason: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Default)]
pub struct QualityLog {
    stage: String,
    rejections: Vec<Rejection>,
}

impl QualityLog {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            rejections: Vec::new(),
        }
    }

    pub fn reject(&mut self, table: &str, rule: &str, reason: impl Into<String>, row_data: serde_json::Value) {
        self.rejections.push(Rejection {
            table: table.to_string(),
            rule: rule.to_string(),
            reason: reason.into(),
            row_data,
        });
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    pub fn len(&self) -> usize {
        self.rejections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rejections.is_empty()
    }

    pub fn count_for(&self, table: &str) -> usize {
        self.rejections.iter().filter(|r| r.table == table).count()
    }

    /// Counts grouped by table then rule, in name order.
    pub fn rule_counts(&self) -> Vec<RuleCount> {
        let mut grouped: BTreeMap<(&str, &str), RuleCount> = BTreeMap::new();
        for r in &self.rejections {
            grouped
                .entry((r.table.as_str(), r.rule.as_str()))
                .or_insert_with(|| RuleCount {
                    table: r.table.clone(),
                    rule: r.rule.clone(),
                    reason: r.reason.clone(),
                    rows: 0,
                })
                .rows += 1;
        }
        grouped.into_values().collect()
    }

    /// One `[DQ]` warning per (table, rule), plus the rejection counters.
    pub fn emit(&self) {
        for c in self.rule_counts() {
            warn!(
                "[DQ] {} | {} | {} | rejected_rows={}",
                c.table, c.rule, c.reason, c.rows
            );
            metrics::clean::rows_rejected(&c.table, &c.rule, c.rows);
        }
    }

    pub fn columns() -> Vec<Column> {
        vec![
            Column::new("run_id", ColumnType::Text),
            Column::new("stage", ColumnType::Text),
            Column::new("table_name", ColumnType::Text),
            Column::new("rule_name", ColumnType::Text),
            Column::new("reason", ColumnType::Text),
            Column::new("row_data", ColumnType::Text),
            Column::new("created_at", ColumnType::Timestamp),
        ]
    }

    /// Rows for `audit.rejected_rows`.
    pub fn to_table(&self, run_id: Uuid, created_at: DateTime<Utc>) -> Table {
        let mut table = Table::new(REJECTED_ROWS, Self::columns());
        for r in &self.rejections {
            table.push_row(vec![
                Value::Text(run_id.to_string()),
                Value::Text(self.stage.clone()),
                Value::Text(r.table.clone()),
                Value::Text(r.rule.clone()),
                Value::Text(r.reason.clone()),
                Value::Text(r.row_data.to_string()),
                Value::Timestamp(created_at),
            ]);
        }
        table
    }
}
