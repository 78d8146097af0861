//! Warehouse backends holding the bronze, silver, gold and audit tables.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;

pub use in_memory::InMemoryWarehouse;
#[cfg(feature = "postgres")]
pub use postgres::PostgresWarehouse;
pub use sqlite::SqliteWarehouse;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::{DatabaseConfig, DbBackend};
use crate::error::{EtlError, Result};
use crate::types::{Column, Layer, Table};

/// Storage trait for the layered warehouse
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Backend name for logs
    fn backend(&self) -> &'static str;

    /// Drop and recreate `layer.table.name` holding exactly `table`'s rows,
    /// atomically.
    async fn replace_table(&self, layer: Layer, table: &Table) -> Result<()>;

    /// Append rows, creating the table first if it does not exist.
    async fn append_rows(&self, layer: Layer, table: &Table) -> Result<()>;

    /// Column names of an existing table in declaration order, or `None`
    /// when the table does not exist.
    async fn table_columns(&self, layer: Layer, name: &str) -> Result<Option<Vec<String>>>;

    /// Read `columns` of a table in insertion order, decoding each column
    /// as its declared type.
    async fn read_table(&self, layer: Layer, name: &str, columns: &[Column]) -> Result<Table>;
}

/// Open the configured warehouse backend.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Warehouse>> {
    match config.backend {
        DbBackend::Sqlite => {
            let warehouse = SqliteWarehouse::open(&config.path)?;
            info!("Using SQLite warehouse at {}", config.path.display());
            Ok(Arc::new(warehouse))
        }
        #[cfg(feature = "postgres")]
        DbBackend::Postgres => Ok(Arc::new(PostgresWarehouse::connect(config).await?)),
        #[cfg(not(feature = "postgres"))]
        DbBackend::Postgres => Err(EtlError::Config(
            "DB_BACKEND=postgres needs a build with the `postgres` feature".to_string(),
        )),
    }
}

/// Read the subset of `expected` columns a stored table actually has,
/// failing with `SchemaMismatch` when the table or a `required` column is
/// absent. Absent optional columns read as Null through `RowRef`.
pub async fn read_conforming(
    warehouse: &dyn Warehouse,
    layer: Layer,
    name: &str,
    expected: &[Column],
    required: &[&str],
) -> Result<Table> {
    let present = match warehouse.table_columns(layer, name).await? {
        Some(cols) => cols,
        None => {
            return Err(EtlError::schema_mismatch(
                &format!("{}.{}", layer, name),
                required.iter().map(|r| r.to_string()).collect(),
            ))
        }
    };

    let missing: Vec<String> = required
        .iter()
        .filter(|r| !present.iter().any(|p| p == *r))
        .map(|r| r.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(EtlError::schema_mismatch(&format!("{}.{}", layer, name), missing));
    }

    let columns: Vec<Column> = expected
        .iter()
        .filter(|c| present.iter().any(|p| *p == c.name))
        .cloned()
        .collect();
    warehouse.read_table(layer, name, &columns).await
}
