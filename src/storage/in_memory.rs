use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::Warehouse;
use crate::error::{EtlError, Result};
use crate::types::{Column, Layer, Table, Value};

type TableMap = HashMap<(Layer, String), Table>;

/// In-memory warehouse for development/testing
#[derive(Clone, Default)]
pub struct InMemoryWarehouse {
    tables: Arc<Mutex<TableMap>>,
    writes: Arc<Mutex<usize>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, TableMap>> {
        self.tables
            .lock()
            .map_err(|_| EtlError::Database("in-memory warehouse lock poisoned".to_string()))
    }

    fn count_write(&self) {
        if let Ok(mut writes) = self.writes.lock() {
            *writes += 1;
        }
    }

    /// Number of replace/append calls so far
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| *w).unwrap_or(0)
    }

    /// Snapshot of a stored table
    pub fn snapshot(&self, layer: Layer, name: &str) -> Option<Table> {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.get(&(layer, name.to_string())).cloned())
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn replace_table(&self, layer: Layer, table: &Table) -> Result<()> {
        self.count_write();
        let mut tables = self.tables()?;
        tables.insert((layer, table.name.clone()), table.clone());
        debug!("Replaced {}.{} ({} rows)", layer, table.name, table.len());
        Ok(())
    }

    async fn append_rows(&self, layer: Layer, table: &Table) -> Result<()> {
        self.count_write();
        let mut tables = self.tables()?;
        let entry = tables
            .entry((layer, table.name.clone()))
            .or_insert_with(|| Table::new(&table.name, table.columns.clone()));
        if entry.columns != table.columns {
            return Err(EtlError::Database(format!(
                "append to {}.{} with a different column list",
                layer, table.name
            )));
        }
        entry.rows.extend(table.rows.iter().cloned());
        Ok(())
    }

    async fn table_columns(&self, layer: Layer, name: &str) -> Result<Option<Vec<String>>> {
        let tables = self.tables()?;
        Ok(tables
            .get(&(layer, name.to_string()))
            .map(|t| t.columns.iter().map(|c| c.name.clone()).collect()))
    }

    async fn read_table(&self, layer: Layer, name: &str, columns: &[Column]) -> Result<Table> {
        let tables = self.tables()?;
        let stored = tables
            .get(&(layer, name.to_string()))
            .ok_or_else(|| EtlError::Database(format!("no such table {}.{}", layer, name)))?;

        let positions = columns
            .iter()
            .map(|c| {
                stored.column_index(&c.name).ok_or_else(|| {
                    EtlError::Database(format!("no such column {}.{}.{}", layer, name, c.name))
                })
            })
            .collect::<Result<Vec<usize>>>()?;

        let mut out = Table::new(name, columns.to_vec());
        for row in &stored.rows {
            let projected: Vec<Value> = positions.iter().map(|&i| row[i].clone()).collect();
            out.push_row(projected);
        }
        Ok(out)
    }
}
