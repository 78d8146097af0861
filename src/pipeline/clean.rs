//! Bronze → silver: type coercion, validation rules and deduplication.

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::coerce;
use super::quality::QualityLog;
use crate::constants::*;
use crate::domain::{from_table, to_table, Customer, Delivery, FromRow, Order, Payment, Product};
use crate::error::{EtlError, Result};
use crate::observability::metrics;
use crate::schema::schema_for;
use crate::storage::{read_conforming, Warehouse};
use crate::types::{Layer, RowRef, Table};

pub const STAGE_NAME: &str = "silver";

/// The five bronze tables as landed
#[derive(Debug, Clone)]
pub struct BronzeTables {
    pub customers: Table,
    pub products: Table,
    pub orders: Table,
    pub payments: Table,
    pub delivery: Table,
}

impl BronzeTables {
    /// Read every bronze table, failing on the first missing table or
    /// required column before anything is cleaned.
    pub async fn load(warehouse: &dyn Warehouse) -> Result<Self> {
        Ok(Self {
            customers: load_bronze(warehouse, CUSTOMERS).await?,
            products: load_bronze(warehouse, PRODUCTS).await?,
            orders: load_bronze(warehouse, ORDERS).await?,
            payments: load_bronze(warehouse, PAYMENTS).await?,
            delivery: load_bronze(warehouse, DELIVERY).await?,
        })
    }
}

async fn load_bronze(warehouse: &dyn Warehouse, name: &str) -> Result<Table> {
    let schema = schema_for(name).ok_or_else(|| EtlError::Config(format!("no sheet schema for '{}'", name)))?;
    read_conforming(
        warehouse,
        Layer::Bronze,
        schema.name,
        &schema.bronze_columns(),
        schema.required,
    )
    .await
}

/// Cleaned, typed silver tables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SilverTables {
    pub customers: Vec<Customer>,
    pub products: Vec<Product>,
    pub orders: Vec<Order>,
    pub payments: Vec<Payment>,
    pub deliveries: Vec<Delivery>,
}

impl SilverTables {
    pub fn to_tables(&self) -> Vec<Table> {
        vec![
            to_table(CUSTOMERS, &self.customers),
            to_table(PRODUCTS, &self.products),
            to_table(ORDERS, &self.orders),
            to_table(PAYMENTS, &self.payments),
            to_table(DELIVERY, &self.deliveries),
        ]
    }

    pub async fn load(warehouse: &dyn Warehouse) -> Result<Self> {
        Ok(Self {
            customers: load_records(warehouse, CUSTOMERS, &["customer_id"]).await?,
            products: load_records(warehouse, PRODUCTS, &["product_id"]).await?,
            orders: load_records(
                warehouse,
                ORDERS,
                &["order_id", "customer_id", "order_date", "total_amount"],
            )
            .await?,
            payments: load_records(warehouse, PAYMENTS, &["payment_id", "order_id"]).await?,
            deliveries: load_records(warehouse, DELIVERY, &["delivery_id", "order_id"]).await?,
        })
    }
}

async fn load_records<R: FromRow>(warehouse: &dyn Warehouse, name: &str, required: &[&str]) -> Result<Vec<R>> {
    let table = read_conforming(warehouse, Layer::Silver, name, &R::columns(), required).await?;
    Ok(from_table(&table))
}

/// Row counts for one cleaned table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCounts {
    pub table: String,
    pub rows_in: usize,
    pub rows_out: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone)]
pub struct CleanReport {
    pub tables: Vec<TableCounts>,
    pub quality: QualityLog,
}

impl CleanReport {
    pub fn rows_in(&self) -> usize {
        self.tables.iter().map(|t| t.rows_in).sum()
    }

    pub fn rows_out(&self) -> usize {
        self.tables.iter().map(|t| t.rows_out).sum()
    }

    pub fn rows_rejected(&self) -> usize {
        self.quality.len()
    }

    pub fn table(&self, name: &str) -> Option<&TableCounts> {
        self.tables.iter().find(|t| t.table == name)
    }
}

/// Applies the cleaning rules in dependency order: customers before orders
/// (signup dates), orders before payments and deliveries (order dates).
pub fn clean_tables(bronze: &BronzeTables) -> (SilverTables, QualityLog) {
    let mut log = QualityLog::new(STAGE_NAME);

    let customers = clean_customers(&bronze.customers, &mut log);
    let products = clean_products(&bronze.products, &mut log);

    let signups: HashMap<&str, NaiveDate> = customers
        .iter()
        .filter_map(|c| c.signup_date.map(|d| (c.customer_id.as_str(), d)))
        .collect();
    let orders = clean_orders(&bronze.orders, &signups, &mut log);

    // order_id is unique per customer only; the first order wins the lookup
    let mut order_index: HashMap<&str, &Order> = HashMap::new();
    for o in &orders {
        order_index.entry(o.order_id.as_str()).or_insert(o);
    }
    let payments = clean_payments(&bronze.payments, &order_index, &mut log);
    let deliveries = clean_deliveries(&bronze.delivery, &order_index, &mut log);

    (
        SilverTables {
            customers,
            products,
            orders,
            payments,
            deliveries,
        },
        log,
    )
}

fn raw<'a>(row: &RowRef<'a>, column: &str) -> Option<&'a str> {
    row.get(column).as_text()
}

/// Keeps the first row per key, rejecting later ones.
struct Dedup<K> {
    seen: HashSet<K>,
}

impl<K: std::hash::Hash + Eq> Dedup<K> {
    fn new() -> Self {
        Self { seen: HashSet::new() }
    }

    fn first(&mut self, key: K) -> bool {
        self.seen.insert(key)
    }
}

fn clean_customers(table: &Table, log: &mut QualityLog) -> Vec<Customer> {
    let mut out = Vec::new();
    let mut dedup = Dedup::new();
    for row in table.iter_rows() {
        let Some(customer_id) = coerce::text(raw(&row, "customer_id")) else {
            log.reject(CUSTOMERS, RULE_MISSING_PK, "customer_id is null", row.to_json());
            continue;
        };
        let age = coerce::integer(raw(&row, "age"));
        if matches!(age, Some(a) if a < 0) {
            log.reject(CUSTOMERS, RULE_AGE_RANGE, "age < 0", row.to_json());
            continue;
        }
        if !dedup.first(customer_id.clone()) {
            log.reject(CUSTOMERS, RULE_DUPLICATE_KEY, "duplicate customer_id", row.to_json());
            continue;
        }
        out.push(Customer {
            customer_id,
            first_name: coerce::text(raw(&row, "first_name")),
            last_name: coerce::text(raw(&row, "last_name")),
            email: coerce::email(raw(&row, "email")),
            city: coerce::text(raw(&row, "city")),
            signup_date: coerce::date(raw(&row, "signup_date")),
            age,
            customer_satisfaction_score: coerce::integer(raw(&row, "customer_satisfaction_score")),
            loyalty_points: coerce::integer(raw(&row, "loyalty_points")),
            age_group: coerce::text(raw(&row, "age_group")),
        });
    }
    out
}

fn clean_products(table: &Table, log: &mut QualityLog) -> Vec<Product> {
    let mut out = Vec::new();
    let mut dedup = Dedup::new();
    for row in table.iter_rows() {
        let Some(product_id) = coerce::text(raw(&row, "product_id")) else {
            log.reject(PRODUCTS, RULE_MISSING_PK, "product_id is null", row.to_json());
            continue;
        };
        let price = coerce::number(raw(&row, "price"));
        if matches!(price, Some(p) if p <= 0.0) {
            log.reject(PRODUCTS, RULE_PRICE_RANGE, "price <= 0", row.to_json());
            continue;
        }
        let stock = coerce::integer(raw(&row, "stock"));
        if matches!(stock, Some(s) if s < 0) {
            log.reject(PRODUCTS, RULE_STOCK_NEG, "stock < 0", row.to_json());
            continue;
        }
        if !dedup.first(product_id.clone()) {
            log.reject(PRODUCTS, RULE_DUPLICATE_KEY, "duplicate product_id", row.to_json());
            continue;
        }
        out.push(Product {
            product_id,
            name: coerce::text(raw(&row, "name")),
            category: coerce::text(raw(&row, "category")),
            price,
            stock,
            rating: coerce::number(raw(&row, "rating")),
            discount_percent: coerce::number(raw(&row, "discount_percent")),
            return_rate: coerce::number(raw(&row, "return_rate")),
            brand: coerce::text(raw(&row, "brand")),
        });
    }
    out
}

fn clean_orders(table: &Table, signups: &HashMap<&str, NaiveDate>, log: &mut QualityLog) -> Vec<Order> {
    let mut out = Vec::new();
    let mut dedup = Dedup::new();
    for row in table.iter_rows() {
        let Some(order_id) = coerce::text(raw(&row, "order_id")) else {
            log.reject(ORDERS, RULE_MISSING_PK, "order_id is null", row.to_json());
            continue;
        };
        let Some(customer_id) = coerce::text(raw(&row, "customer_id")) else {
            log.reject(ORDERS, RULE_MISSING_CUSTOMER, "customer_id is null", row.to_json());
            continue;
        };
        let Some(order_date) = coerce::date(raw(&row, "order_date")) else {
            log.reject(ORDERS, RULE_MISSING_DATE, "order_date is null or unparseable", row.to_json());
            continue;
        };
        let Some(total_amount) = coerce::number(raw(&row, "total_amount")) else {
            log.reject(ORDERS, RULE_INVALID_AMOUNT, "total_amount is null or not numeric", row.to_json());
            continue;
        };
        if total_amount <= 0.0 {
            log.reject(ORDERS, RULE_TOTAL_AMT, "total_amount <= 0", row.to_json());
            continue;
        }
        if matches!(signups.get(customer_id.as_str()), Some(signup) if order_date < *signup) {
            log.reject(ORDERS, RULE_DATE_LOGIC, "order_date before signup_date", row.to_json());
            continue;
        }
        if !dedup.first((customer_id.clone(), order_id.clone())) {
            log.reject(ORDERS, RULE_DUPLICATE_KEY, "duplicate (customer_id, order_id)", row.to_json());
            continue;
        }
        out.push(Order {
            order_id,
            customer_id,
            product_id: coerce::text(raw(&row, "product_id")),
            order_date,
            total_amount,
            payment_type: coerce::text(raw(&row, "payment_type")),
            order_status: coerce::text(raw(&row, "order_status")),
            repeat_customer: coerce::boolean(raw(&row, "repeat_customer")),
            cancellation_flag: coerce::boolean(raw(&row, "cancellation_flag")),
        });
    }
    out
}

fn is_cancelled(order: &Order) -> bool {
    order.cancellation_flag == Some(true)
        || order
            .order_status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("cancelled") || s.eq_ignore_ascii_case("canceled"))
}

fn clean_payments(table: &Table, orders: &HashMap<&str, &Order>, log: &mut QualityLog) -> Vec<Payment> {
    let mut out = Vec::new();
    let mut dedup = Dedup::new();
    for row in table.iter_rows() {
        let (Some(payment_id), Some(order_id)) = (
            coerce::text(raw(&row, "payment_id")),
            coerce::text(raw(&row, "order_id")),
        ) else {
            log.reject(PAYMENTS, RULE_MISSING_PK, "payment_id or order_id is null", row.to_json());
            continue;
        };
        let payment_date = coerce::date(raw(&row, "payment_date"));
        let payment_status = coerce::text(raw(&row, "payment_status"));

        if let Some(order) = orders.get(order_id.as_str()) {
            if matches!(payment_date, Some(d) if d < order.order_date) {
                log.reject(PAYMENTS, RULE_PAYMENT_LOGIC, "payment_date before order_date", row.to_json());
                continue;
            }
            let succeeded = payment_status
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("success"));
            if is_cancelled(order) && succeeded {
                log.reject(PAYMENTS, RULE_PAYMENT_LOGIC, "successful payment on cancelled order", row.to_json());
                continue;
            }
        }
        if !dedup.first(payment_id.clone()) {
            log.reject(PAYMENTS, RULE_DUPLICATE_KEY, "duplicate payment_id", row.to_json());
            continue;
        }
        out.push(Payment {
            payment_id,
            order_id,
            payment_date,
            payment_type: coerce::text(raw(&row, "payment_type")),
            payment_status,
            refund_flag: coerce::boolean(raw(&row, "refund_flag")),
        });
    }
    out
}

fn clean_deliveries(table: &Table, orders: &HashMap<&str, &Order>, log: &mut QualityLog) -> Vec<Delivery> {
    let mut out = Vec::new();
    let mut dedup = Dedup::new();
    for row in table.iter_rows() {
        let (Some(delivery_id), Some(order_id)) = (
            coerce::text(raw(&row, "delivery_id")),
            coerce::text(raw(&row, "order_id")),
        ) else {
            log.reject(DELIVERY, RULE_MISSING_PK, "delivery_id or order_id is null", row.to_json());
            continue;
        };
        let delivery_date = coerce::date(raw(&row, "delivery_date"));
        if let (Some(order), Some(d)) = (orders.get(order_id.as_str()), delivery_date) {
            if d < order.order_date {
                log.reject(DELIVERY, RULE_DELIVERY_LOGIC, "delivery_date before order_date", row.to_json());
                continue;
            }
        }
        if !dedup.first(delivery_id.clone()) {
            log.reject(DELIVERY, RULE_DUPLICATE_KEY, "duplicate delivery_id", row.to_json());
            continue;
        }
        out.push(Delivery {
            delivery_id,
            order_id,
            delivery_date,
            delivery_partner: coerce::text(raw(&row, "delivery_partner")),
            delivery_status: coerce::text(raw(&row, "delivery_status")),
            customer_feedback: coerce::text(raw(&row, "customer_feedback")),
        });
    }
    out
}

/// Silver stage runner
pub struct Cleaner {
    warehouse: Arc<dyn Warehouse>,
}

impl std::fmt::Debug for Cleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleaner")
            .field("warehouse", &self.warehouse.backend())
            .finish()
    }
}

impl Cleaner {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Reads bronze, replaces every silver table and appends the rejected
    /// rows to the audit log.
    #[instrument(skip(self), fields(backend = self.warehouse.backend()))]
    pub async fn run(&self, run_id: uuid::Uuid) -> Result<CleanReport> {
        let bronze = BronzeTables::load(self.warehouse.as_ref()).await?;
        let (silver, quality) = clean_tables(&bronze);

        let rows_in = [
            (CUSTOMERS, bronze.customers.len()),
            (PRODUCTS, bronze.products.len()),
            (ORDERS, bronze.orders.len()),
            (PAYMENTS, bronze.payments.len()),
            (DELIVERY, bronze.delivery.len()),
        ];
        let mut tables = Vec::with_capacity(rows_in.len());
        for (table, (name, rows_in)) in silver.to_tables().iter().zip(rows_in) {
            self.warehouse.replace_table(Layer::Silver, table).await?;
            let counts = TableCounts {
                table: name.to_string(),
                rows_in,
                rows_out: table.len(),
                rejected: quality.count_for(name),
            };
            debug!(
                "silver.{}: {} in, {} out, {} rejected",
                counts.table, counts.rows_in, counts.rows_out, counts.rejected
            );
            metrics::clean::table_cleaned(name, rows_in, table.len());
            tables.push(counts);
        }

        if !quality.is_empty() {
            let audit = quality.to_table(run_id, chrono::Utc::now());
            self.warehouse.append_rows(Layer::Audit, &audit).await?;
        }
        quality.emit();

        let report = CleanReport { tables, quality };
        info!(
            "🧹 Cleaned {} bronze rows into {} silver rows ({} rejected)",
            report.rows_in(),
            report.rows_out(),
            report.rows_rejected()
        );
        Ok(report)
    }
}
