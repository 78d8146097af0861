use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::Warehouse;
use crate::error::{EtlError, Result};
use crate::types::{Column, ColumnType, Layer, Table, Value};

/// SQLite warehouse. SQLite has no schemas, so each layer becomes a table
/// name prefix: `silver.orders` is stored as `silver_orders`.
pub struct SqliteWarehouse {
    conn: Mutex<Connection>,
}

impl SqliteWarehouse {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!("Opened SQLite warehouse at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EtlError::Database("SQLite connection lock poisoned".to_string()))
    }
}

fn table_ident(layer: Layer, name: &str) -> String {
    format!("\"{}_{}\"", layer.as_str(), name.replace('"', ""))
}

fn column_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', ""))
}

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Text | ColumnType::Date | ColumnType::Timestamp => "TEXT",
        ColumnType::Integer | ColumnType::Boolean => "INTEGER",
        ColumnType::Real => "REAL",
    }
}

fn create_sql(layer: Layer, table: &Table, if_not_exists: bool) -> String {
    let cols: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} {}", column_ident(&c.name), sql_type(c.ty)))
        .collect();
    format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        table_ident(layer, &table.name),
        cols.join(", ")
    )
}

fn insert_sql(layer: Layer, table: &Table) -> String {
    let cols: Vec<String> = table.columns.iter().map(|c| column_ident(&c.name)).collect();
    let placeholders: Vec<String> = (1..=table.columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table_ident(layer, &table.name),
        cols.join(", "),
        placeholders.join(", ")
    )
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(f) => SqlValue::Real(*f),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
        Value::Timestamp(ts) => SqlValue::Text(ts.to_rfc3339()),
    }
}

fn from_sql(value: SqlValue, ty: ColumnType) -> Value {
    match (value, ty) {
        (SqlValue::Null, _) => Value::Null,
        (SqlValue::Text(s), ColumnType::Text) => Value::Text(s),
        (SqlValue::Integer(i), ColumnType::Text) => Value::Text(i.to_string()),
        (SqlValue::Real(f), ColumnType::Text) => Value::Text(f.to_string()),
        (SqlValue::Integer(i), ColumnType::Integer) => Value::Integer(i),
        (SqlValue::Real(f), ColumnType::Integer) => Value::Integer(f as i64),
        (SqlValue::Text(s), ColumnType::Integer) => s.trim().parse().map(Value::Integer).unwrap_or(Value::Null),
        (SqlValue::Real(f), ColumnType::Real) => Value::Real(f),
        (SqlValue::Integer(i), ColumnType::Real) => Value::Real(i as f64),
        (SqlValue::Text(s), ColumnType::Real) => s.trim().parse().map(Value::Real).unwrap_or(Value::Null),
        (SqlValue::Integer(i), ColumnType::Boolean) => Value::Boolean(i != 0),
        (SqlValue::Text(s), ColumnType::Date) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(Value::Date)
            .unwrap_or(Value::Null),
        (SqlValue::Text(s), ColumnType::Timestamp) => DateTime::parse_from_rfc3339(&s)
            .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn replace_table(&self, layer: Layer, table: &Table) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", table_ident(layer, &table.name)))?;
        tx.execute_batch(&create_sql(layer, table, false))?;
        {
            let mut stmt = tx.prepare(&insert_sql(layer, table))?;
            for row in &table.rows {
                stmt.execute(params_from_iter(row.iter().map(to_sql)))?;
            }
        }
        tx.commit()?;
        debug!("Replaced {}.{} ({} rows)", layer, table.name, table.len());
        Ok(())
    }

    async fn append_rows(&self, layer: Layer, table: &Table) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute_batch(&create_sql(layer, table, true))?;
        {
            let mut stmt = tx.prepare(&insert_sql(layer, table))?;
            for row in &table.rows {
                stmt.execute(params_from_iter(row.iter().map(to_sql)))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn table_columns(&self, layer: Layer, name: &str) -> Result<Option<Vec<String>>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table_ident(layer, name)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        if names.is_empty() {
            Ok(None)
        } else {
            Ok(Some(names))
        }
    }

    async fn read_table(&self, layer: Layer, name: &str, columns: &[Column]) -> Result<Table> {
        let conn = self.conn()?;
        let select: Vec<String> = columns.iter().map(|c| column_ident(&c.name)).collect();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            select.join(", "),
            table_ident(layer, name)
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut out = Table::new(name, columns.to_vec());
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for (i, col) in columns.iter().enumerate() {
                let raw: SqlValue = row.get(i)?;
                values.push(from_sql(raw, col.ty));
            }
            out.push_row(values);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut t = Table::new(
            "orders",
            vec![
                Column::text("order_id"),
                Column::new("total_amount", ColumnType::Real),
                Column::new("order_date", ColumnType::Date),
                Column::new("cancellation_flag", ColumnType::Boolean),
                Column::new("items", ColumnType::Integer),
            ],
        );
        t.push_row(vec![
            Value::Text("O1".into()),
            Value::Real(19.99),
            Value::Date(NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()),
            Value::Boolean(true),
            Value::Integer(3),
        ]);
        t.push_row(vec![Value::Text("O2".into()), Value::Null, Value::Null, Value::Boolean(false), Value::Null]);
        t
    }

    #[tokio::test]
    async fn test_replace_and_read_back_typed() {
        let wh = SqliteWarehouse::open_in_memory().unwrap();
        let table = sample();
        wh.replace_table(Layer::Silver, &table).await.unwrap();

        let back = wh.read_table(Layer::Silver, "orders", &table.columns).await.unwrap();
        assert_eq!(back, table);
    }

    #[tokio::test]
    async fn test_replace_truncates_previous_rows() {
        let wh = SqliteWarehouse::open_in_memory().unwrap();
        let table = sample();
        wh.replace_table(Layer::Gold, &table).await.unwrap();
        wh.replace_table(Layer::Gold, &table).await.unwrap();

        let back = wh.read_table(Layer::Gold, "orders", &table.columns).await.unwrap();
        assert_eq!(back.len(), 2);
    }

    #[tokio::test]
    async fn test_append_accumulates_and_columns_listed() {
        let wh = SqliteWarehouse::open_in_memory().unwrap();
        let table = sample();
        assert_eq!(wh.table_columns(Layer::Audit, "orders").await.unwrap(), None);

        wh.append_rows(Layer::Audit, &table).await.unwrap();
        wh.append_rows(Layer::Audit, &table).await.unwrap();

        let cols = wh.table_columns(Layer::Audit, "orders").await.unwrap().unwrap();
        assert_eq!(cols[0], "order_id");
        let back = wh.read_table(Layer::Audit, "orders", &table.columns).await.unwrap();
        assert_eq!(back.len(), 4);
    }

    #[tokio::test]
    async fn test_layers_are_separate_tables() {
        let wh = SqliteWarehouse::open_in_memory().unwrap();
        wh.replace_table(Layer::Bronze, &sample()).await.unwrap();
        assert!(wh.table_columns(Layer::Silver, "orders").await.unwrap().is_none());
    }
}
