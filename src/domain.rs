//! Typed silver and gold records and their table mappings.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{Column, ColumnType, RowRef, Table, Value};

/// A record type with a fixed column layout
pub trait TableRecord {
    fn columns() -> Vec<Column>;
    fn to_row(&self) -> Vec<Value>;
}

/// A record that can be decoded back from a stored row
pub trait FromRow: TableRecord + Sized {
    /// `None` when the row lacks a value the record cannot do without.
    fn from_row(row: RowRef<'_>) -> Option<Self>;
}

pub fn to_table<R: TableRecord>(name: &str, records: &[R]) -> Table {
    let mut table = Table::new(name, R::columns());
    for record in records {
        table.push_row(record.to_row());
    }
    table
}

pub fn from_table<R: FromRow>(table: &Table) -> Vec<R> {
    table.iter_rows().filter_map(R::from_row).collect()
}

fn col(name: &str, ty: ColumnType) -> Column {
    Column::new(name, ty)
}

// ---------------------------------------------------------------------------
// Silver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub city: Option<String>,
    pub signup_date: Option<NaiveDate>,
    pub age: Option<i64>,
    pub customer_satisfaction_score: Option<i64>,
    pub loyalty_points: Option<i64>,
    pub age_group: Option<String>,
}

impl TableRecord for Customer {
    fn columns() -> Vec<Column> {
        vec![
            col("customer_id", ColumnType::Text),
            col("first_name", ColumnType::Text),
            col("last_name", ColumnType::Text),
            col("email", ColumnType::Text),
            col("city", ColumnType::Text),
            col("signup_date", ColumnType::Date),
            col("age", ColumnType::Integer),
            col("customer_satisfaction_score", ColumnType::Integer),
            col("loyalty_points", ColumnType::Integer),
            col("age_group", ColumnType::Text),
        ]
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Text(self.customer_id.clone()),
            self.first_name.clone().into(),
            self.last_name.clone().into(),
            self.email.clone().into(),
            self.city.clone().into(),
            self.signup_date.into(),
            self.age.into(),
            self.customer_satisfaction_score.into(),
            self.loyalty_points.into(),
            self.age_group.clone().into(),
        ]
    }
}

impl FromRow for Customer {
    fn from_row(row: RowRef<'_>) -> Option<Self> {
        Some(Self {
            customer_id: row.text("customer_id")?,
            first_name: row.text("first_name"),
            last_name: row.text("last_name"),
            email: row.text("email"),
            city: row.text("city"),
            signup_date: row.date("signup_date"),
            age: row.int("age"),
            customer_satisfaction_score: row.int("customer_satisfaction_score"),
            loyalty_points: row.int("loyalty_points"),
            age_group: row.text("age_group"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub name: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<i64>,
    pub rating: Option<f64>,
    pub discount_percent: Option<f64>,
    pub return_rate: Option<f64>,
    pub brand: Option<String>,
}

impl TableRecord for Product {
    fn columns() -> Vec<Column> {
        vec![
            col("product_id", ColumnType::Text),
            col("name", ColumnType::Text),
            col("category", ColumnType::Text),
            col("price", ColumnType::Real),
            col("stock", ColumnType::Integer),
            col("rating", ColumnType::Real),
            col("discount_percent", ColumnType::Real),
            col("return_rate", ColumnType::Real),
            col("brand", ColumnType::Text),
        ]
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Text(self.product_id.clone()),
            self.name.clone().into(),
            self.category.clone().into(),
            self.price.into(),
            self.stock.into(),
            self.rating.into(),
            self.discount_percent.into(),
            self.return_rate.into(),
            self.brand.clone().into(),
        ]
    }
}

impl FromRow for Product {
    fn from_row(row: RowRef<'_>) -> Option<Self> {
        Some(Self {
            product_id: row.text("product_id")?,
            name: row.text("name"),
            category: row.text("category"),
            price: row.real("price"),
            stock: row.int("stock"),
            rating: row.real("rating"),
            discount_percent: row.real("discount_percent"),
            return_rate: row.real("return_rate"),
            brand: row.text("brand"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub customer_id: String,
    pub product_id: Option<String>,
    pub order_date: NaiveDate,
    pub total_amount: f64,
    pub payment_type: Option<String>,
    pub order_status: Option<String>,
    pub repeat_customer: Option<bool>,
    pub cancellation_flag: Option<bool>,
}

impl TableRecord for Order {
    fn columns() -> Vec<Column> {
        vec![
            col("order_id", ColumnType::Text),
            col("customer_id", ColumnType::Text),
            col("product_id", ColumnType::Text),
            col("order_date", ColumnType::Date),
            col("total_amount", ColumnType::Real),
            col("payment_type", ColumnType::Text),
            col("order_status", ColumnType::Text),
            col("repeat_customer", ColumnType::Boolean),
            col("cancellation_flag", ColumnType::Boolean),
        ]
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Text(self.order_id.clone()),
            Value::Text(self.customer_id.clone()),
            self.product_id.clone().into(),
            Value::Date(self.order_date),
            Value::Real(self.total_amount),
            self.payment_type.clone().into(),
            self.order_status.clone().into(),
            self.repeat_customer.into(),
            self.cancellation_flag.into(),
        ]
    }
}

impl FromRow for Order {
    fn from_row(row: RowRef<'_>) -> Option<Self> {
        Some(Self {
            order_id: row.text("order_id")?,
            customer_id: row.text("customer_id")?,
            product_id: row.text("product_id"),
            order_date: row.date("order_date")?,
            total_amount: row.real("total_amount")?,
            payment_type: row.text("payment_type"),
            order_status: row.text("order_status"),
            repeat_customer: row.boolean("repeat_customer"),
            cancellation_flag: row.boolean("cancellation_flag"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: String,
    pub order_id: String,
    pub payment_date: Option<NaiveDate>,
    pub payment_type: Option<String>,
    pub payment_status: Option<String>,
    pub refund_flag: Option<bool>,
}

impl TableRecord for Payment {
    fn columns() -> Vec<Column> {
        vec![
            col("payment_id", ColumnType::Text),
            col("order_id", ColumnType::Text),
            col("payment_date", ColumnType::Date),
            col("payment_type", ColumnType::Text),
            col("payment_status", ColumnType::Text),
            col("refund_flag", ColumnType::Boolean),
        ]
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Text(self.payment_id.clone()),
            Value::Text(self.order_id.clone()),
            self.payment_date.into(),
            self.payment_type.clone().into(),
            self.payment_status.clone().into(),
            self.refund_flag.into(),
        ]
    }
}

impl FromRow for Payment {
    fn from_row(row: RowRef<'_>) -> Option<Self> {
        Some(Self {
            payment_id: row.text("payment_id")?,
            order_id: row.text("order_id")?,
            payment_date: row.date("payment_date"),
            payment_type: row.text("payment_type"),
            payment_status: row.text("payment_status"),
            refund_flag: row.boolean("refund_flag"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub delivery_id: String,
    pub order_id: String,
    pub delivery_date: Option<NaiveDate>,
    pub delivery_partner: Option<String>,
    pub delivery_status: Option<String>,
    pub customer_feedback: Option<String>,
}

impl TableRecord for Delivery {
    fn columns() -> Vec<Column> {
        vec![
            col("delivery_id", ColumnType::Text),
            col("order_id", ColumnType::Text),
            col("delivery_date", ColumnType::Date),
            col("delivery_partner", ColumnType::Text),
            col("delivery_status", ColumnType::Text),
            col("customer_feedback", ColumnType::Text),
        ]
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Text(self.delivery_id.clone()),
            Value::Text(self.order_id.clone()),
            self.delivery_date.into(),
            self.delivery_partner.clone().into(),
            self.delivery_status.clone().into(),
            self.customer_feedback.clone().into(),
        ]
    }
}

impl FromRow for Delivery {
    fn from_row(row: RowRef<'_>) -> Option<Self> {
        Some(Self {
            delivery_id: row.text("delivery_id")?,
            order_id: row.text("order_id")?,
            delivery_date: row.date("delivery_date"),
            delivery_partner: row.text("delivery_partner"),
            delivery_status: row.text("delivery_status"),
            customer_feedback: row.text("customer_feedback"),
        })
    }
}

// ---------------------------------------------------------------------------
// Gold
// ---------------------------------------------------------------------------

/// One row per silver customer: every silver column plus order rollups
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerAgg {
    pub customer_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub city: Option<String>,
    pub signup_date: Option<NaiveDate>,
    pub age: Option<i64>,
    pub customer_satisfaction_score: Option<i64>,
    pub loyalty_points: Option<i64>,
    pub age_group: Option<String>,
    pub total_orders: i64,
    pub total_spent: f64,
    pub avg_order_amount: f64,
    pub total_payments: i64,
    pub total_deliveries: i64,
    pub segment: String,
}

impl TableRecord for CustomerAgg {
    fn columns() -> Vec<Column> {
        vec![
            col("customer_id", ColumnType::Text),
            col("first_name", ColumnType::Text),
            col("last_name", ColumnType::Text),
            col("email", ColumnType::Text),
            col("city", ColumnType::Text),
            col("signup_date", ColumnType::Date),
            col("age", ColumnType::Integer),
            col("customer_satisfaction_score", ColumnType::Integer),
            col("loyalty_points", ColumnType::Integer),
            col("age_group", ColumnType::Text),
            col("total_orders", ColumnType::Integer),
            col("total_spent", ColumnType::Real),
            col("avg_order_amount", ColumnType::Real),
            col("total_payments", ColumnType::Integer),
            col("total_deliveries", ColumnType::Integer),
            col("segment", ColumnType::Text),
        ]
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Text(self.customer_id.clone()),
            self.first_name.clone().into(),
            self.last_name.clone().into(),
            self.email.clone().into(),
            self.city.clone().into(),
            self.signup_date.into(),
            self.age.into(),
            self.customer_satisfaction_score.into(),
            self.loyalty_points.into(),
            self.age_group.clone().into(),
            Value::Integer(self.total_orders),
            Value::Real(self.total_spent),
            Value::Real(self.avg_order_amount),
            Value::Integer(self.total_payments),
            Value::Integer(self.total_deliveries),
            Value::Text(self.segment.clone()),
        ]
    }
}

/// One row per silver product: every silver column plus sales rollups
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductAgg {
    pub product_id: String,
    pub name: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<i64>,
    pub rating: Option<f64>,
    pub discount_percent: Option<f64>,
    pub return_rate: Option<f64>,
    pub brand: Option<String>,
    pub total_sold: i64,
    pub total_revenue: f64,
}

impl TableRecord for ProductAgg {
    fn columns() -> Vec<Column> {
        vec![
            col("product_id", ColumnType::Text),
            col("name", ColumnType::Text),
            col("category", ColumnType::Text),
            col("price", ColumnType::Real),
            col("stock", ColumnType::Integer),
            col("rating", ColumnType::Real),
            col("discount_percent", ColumnType::Real),
            col("return_rate", ColumnType::Real),
            col("brand", ColumnType::Text),
            col("total_sold", ColumnType::Integer),
            col("total_revenue", ColumnType::Real),
        ]
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Text(self.product_id.clone()),
            self.name.clone().into(),
            self.category.clone().into(),
            self.price.into(),
            self.stock.into(),
            self.rating.into(),
            self.discount_percent.into(),
            self.return_rate.into(),
            self.brand.clone().into(),
            Value::Integer(self.total_sold),
            Value::Real(self.total_revenue),
        ]
    }
}

/// Revenue rolled up by one product dimension (brand or category)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionRevenue {
    pub key: String,
    pub product_count: i64,
    pub total_orders: i64,
    pub total_revenue: f64,
    pub avg_rating: Option<f64>,
}

impl DimensionRevenue {
    pub fn columns(key_column: &str) -> Vec<Column> {
        vec![
            col(key_column, ColumnType::Text),
            col("product_count", ColumnType::Integer),
            col("total_orders", ColumnType::Integer),
            col("total_revenue", ColumnType::Real),
            col("avg_rating", ColumnType::Real),
        ]
    }

    pub fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Text(self.key.clone()),
            Value::Integer(self.product_count),
            Value::Integer(self.total_orders),
            Value::Real(self.total_revenue),
            self.avg_rating.into(),
        ]
    }

    pub fn to_table(name: &str, key_column: &str, rows: &[DimensionRevenue]) -> Table {
        let mut table = Table::new(name, Self::columns(key_column));
        for row in rows {
            table.push_row(row.to_row());
        }
        table
    }
}

/// Orders against deliveries per calendar month
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyActivity {
    /// `YYYY-MM`
    pub month: String,
    pub orders: i64,
    pub deliveries: i64,
    pub revenue: f64,
    pub distinct_customers: i64,
    pub repeat_customers: i64,
}

impl TableRecord for MonthlyActivity {
    fn columns() -> Vec<Column> {
        vec![
            col("month", ColumnType::Text),
            col("orders", ColumnType::Integer),
            col("deliveries", ColumnType::Integer),
            col("revenue", ColumnType::Real),
            col("distinct_customers", ColumnType::Integer),
            col("repeat_customers", ColumnType::Integer),
        ]
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Text(self.month.clone()),
            Value::Integer(self.orders),
            Value::Integer(self.deliveries),
            Value::Real(self.revenue),
            Value::Integer(self.distinct_customers),
            Value::Integer(self.repeat_customers),
        ]
    }
}

/// Single-row KPI table for dashboard headline tiles
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub total_customers: i64,
    pub active_customers: i64,
    pub repeat_customers: i64,
    pub total_orders: i64,
    /// Orders whose customer is not a silver customer
    pub orphan_orders: i64,
    pub total_revenue: f64,
    pub avg_order_amount: f64,
    pub avg_rating: Option<f64>,
    pub avg_satisfaction: Option<f64>,
}

impl TableRecord for Overview {
    fn columns() -> Vec<Column> {
        vec![
            col("total_customers", ColumnType::Integer),
            col("active_customers", ColumnType::Integer),
            col("repeat_customers", ColumnType::Integer),
            col("total_orders", ColumnType::Integer),
            col("orphan_orders", ColumnType::Integer),
            col("total_revenue", ColumnType::Real),
            col("avg_order_amount", ColumnType::Real),
            col("avg_rating", ColumnType::Real),
            col("avg_satisfaction", ColumnType::Real),
        ]
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.total_customers),
            Value::Integer(self.active_customers),
            Value::Integer(self.repeat_customers),
            Value::Integer(self.total_orders),
            Value::Integer(self.orphan_orders),
            Value::Real(self.total_revenue),
            Value::Real(self.avg_order_amount),
            self.avg_rating.into(),
            self.avg_satisfaction.into(),
        ]
    }
}
