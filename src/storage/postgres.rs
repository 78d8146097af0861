use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, info};

use super::Warehouse;
use crate::config::DatabaseConfig;
use crate::error::{EtlError, Result};
use crate::types::{Column, ColumnType, Layer, Table, Value};

pub type DbPool = PgPool;

/// Postgres warehouse: one schema per layer (`bronze`, `silver`, `gold`, `audit`).
pub struct PostgresWarehouse {
    pool: DbPool,
}

impl PostgresWarehouse {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        info!(
            "Connected to Postgres warehouse {}@{}:{}/{}",
            config.user, config.host, config.port, config.name
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', ""))
}

fn table_ident(layer: Layer, name: &str) -> String {
    format!("{}.{}", ident(layer.as_str()), ident(name))
}

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Text => "TEXT",
        ColumnType::Integer => "BIGINT",
        ColumnType::Real => "DOUBLE PRECISION",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Date => "DATE",
        ColumnType::Timestamp => "TIMESTAMPTZ",
    }
}

fn create_sql(layer: Layer, table: &Table, if_not_exists: bool) -> String {
    let cols: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} {}", ident(&c.name), sql_type(c.ty)))
        .collect();
    format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        table_ident(layer, &table.name),
        cols.join(", ")
    )
}

fn insert_sql(layer: Layer, table: &Table) -> String {
    let cols: Vec<String> = table.columns.iter().map(|c| ident(&c.name)).collect();
    let placeholders: Vec<String> = (1..=table.columns.len()).map(|i| format!("${}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table_ident(layer, &table.name),
        cols.join(", "),
        placeholders.join(", ")
    )
}

/// Bind a value using the column's declared type, so Nulls carry a type too.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
    ty: ColumnType,
) -> Query<'q, Postgres, PgArguments> {
    match ty {
        ColumnType::Text => query.bind(match value {
            Value::Null => None,
            other => Some(other.render()),
        }),
        ColumnType::Integer => query.bind(value.as_i64()),
        ColumnType::Real => query.bind(value.as_f64()),
        ColumnType::Boolean => query.bind(value.as_bool()),
        ColumnType::Date => query.bind(value.as_date()),
        ColumnType::Timestamp => query.bind(match value {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }),
    }
}

fn decode(row: &PgRow, index: usize, ty: ColumnType) -> Result<Value> {
    let value = match ty {
        ColumnType::Text => row.try_get::<Option<String>, _>(index)?.into(),
        ColumnType::Integer => row.try_get::<Option<i64>, _>(index)?.into(),
        ColumnType::Real => row.try_get::<Option<f64>, _>(index)?.into(),
        ColumnType::Boolean => row.try_get::<Option<bool>, _>(index)?.into(),
        ColumnType::Date => row.try_get::<Option<NaiveDate>, _>(index)?.into(),
        ColumnType::Timestamp => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(Value::Timestamp)
            .unwrap_or(Value::Null),
    };
    Ok(value)
}

impl PostgresWarehouse {
    async fn write_rows(&self, layer: Layer, table: &Table, replace: bool) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", ident(layer.as_str())))
            .execute(&mut *tx)
            .await?;
        if replace {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", table_ident(layer, &table.name)))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(&create_sql(layer, table, !replace))
            .execute(&mut *tx)
            .await?;

        let insert = insert_sql(layer, table);
        for row in &table.rows {
            let mut query = sqlx::query(&insert);
            for (value, col) in row.iter().zip(&table.columns) {
                query = bind_value(query, value, col.ty);
            }
            query.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn replace_table(&self, layer: Layer, table: &Table) -> Result<()> {
        self.write_rows(layer, table, true).await?;
        debug!("Replaced {}.{} ({} rows)", layer, table.name, table.len());
        Ok(())
    }

    async fn append_rows(&self, layer: Layer, table: &Table) -> Result<()> {
        self.write_rows(layer, table, false).await
    }

    async fn table_columns(&self, layer: Layer, name: &str) -> Result<Option<Vec<String>>> {
        let rows = sqlx::query(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
        )
        .bind(layer.as_str())
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        let names = rows
            .iter()
            .map(|r| r.try_get::<String, _>(0))
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(if names.is_empty() { None } else { Some(names) })
    }

    async fn read_table(&self, layer: Layer, name: &str, columns: &[Column]) -> Result<Table> {
        if columns.is_empty() {
            return Err(EtlError::Database(format!(
                "read of {}.{} with no columns",
                layer, name
            )));
        }
        let select: Vec<String> = columns.iter().map(|c| ident(&c.name)).collect();
        // ctid keeps insertion order for tables written in one pass
        let sql = format!(
            "SELECT {} FROM {} ORDER BY ctid",
            select.join(", "),
            table_ident(layer, name)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut out = Table::new(name, columns.to_vec());
        for row in &rows {
            let values = columns
                .iter()
                .enumerate()
                .map(|(i, c)| decode(row, i, c.ty))
                .collect::<Result<Vec<Value>>>()?;
            out.push_row(values);
        }
        Ok(out)
    }
}
