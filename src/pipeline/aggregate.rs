//! Silver → gold business aggregates.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};

use super::clean::SilverTables;
use crate::constants::*;
use crate::domain::{
    to_table, CustomerAgg, DimensionRevenue, MonthlyActivity, Overview, ProductAgg, TableRecord,
};
use crate::error::Result;
use crate::observability::metrics;
use crate::storage::Warehouse;
use crate::types::{Column, Layer, Table};

pub const STAGE_NAME: &str = "gold";

/// Bucket for products without a brand or category
pub const UNKNOWN_DIMENSION: &str = "unknown";

/// Round to cents so reruns compare equal
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(round2(sum / n as f64))
    }
}

/// All gold tables computed from one silver snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct GoldTables {
    pub customer_agg: Vec<CustomerAgg>,
    pub product_agg: Vec<ProductAgg>,
    pub brand_revenue: Vec<DimensionRevenue>,
    pub category_revenue: Vec<DimensionRevenue>,
    pub monthly_activity: Vec<MonthlyActivity>,
    pub overview: Overview,
}

impl GoldTables {
    pub fn to_tables(&self) -> Vec<Table> {
        vec![
            to_table(CUSTOMER_AGG, &self.customer_agg),
            to_table(PRODUCT_AGG, &self.product_agg),
            DimensionRevenue::to_table(BRAND_REVENUE, "brand", &self.brand_revenue),
            DimensionRevenue::to_table(CATEGORY_REVENUE, "category", &self.category_revenue),
            to_table(MONTHLY_ACTIVITY, &self.monthly_activity),
            to_table(OVERVIEW, std::slice::from_ref(&self.overview)),
        ]
    }
}

/// Column layout of a gold table, for reading it back
pub fn gold_columns(table: &str) -> Option<Vec<Column>> {
    match table {
        CUSTOMER_AGG => Some(CustomerAgg::columns()),
        PRODUCT_AGG => Some(ProductAgg::columns()),
        BRAND_REVENUE => Some(DimensionRevenue::columns("brand")),
        CATEGORY_REVENUE => Some(DimensionRevenue::columns("category")),
        MONTHLY_ACTIVITY => Some(MonthlyActivity::columns()),
        OVERVIEW => Some(Overview::columns()),
        _ => None,
    }
}

#[derive(Default)]
struct OrderStats {
    orders: i64,
    revenue: f64,
}

impl OrderStats {
    fn add(&mut self, amount: f64) {
        self.orders += 1;
        self.revenue += amount;
    }
}

pub fn aggregate(silver: &SilverTables) -> GoldTables {
    let customer_agg = customer_agg(silver);
    let product_agg = product_agg(silver);
    let brand_revenue = revenue_by(silver, |p| p.brand.as_deref());
    let category_revenue = revenue_by(silver, |p| p.category.as_deref());
    let monthly_activity = monthly_activity(silver);
    let overview = overview(silver);

    GoldTables {
        customer_agg,
        product_agg,
        brand_revenue,
        category_revenue,
        monthly_activity,
        overview,
    }
}

fn segment(total_orders: i64) -> &'static str {
    match total_orders {
        0 => SEGMENT_INACTIVE,
        n if (n as usize) < REPEAT_CUSTOMER_MIN_ORDERS => SEGMENT_ACTIVE,
        _ => SEGMENT_REPEAT,
    }
}

fn customer_agg(silver: &SilverTables) -> Vec<CustomerAgg> {
    let mut orders: HashMap<&str, OrderStats> = HashMap::new();
    // payments and deliveries reach a customer through the order
    let mut order_owner: HashMap<&str, &str> = HashMap::new();
    for o in &silver.orders {
        orders.entry(o.customer_id.as_str()).or_default().add(o.total_amount);
        order_owner.entry(o.order_id.as_str()).or_insert(o.customer_id.as_str());
    }

    let mut payments: HashMap<&str, i64> = HashMap::new();
    for p in &silver.payments {
        if let Some(owner) = order_owner.get(p.order_id.as_str()) {
            *payments.entry(*owner).or_default() += 1;
        }
    }
    let mut deliveries: HashMap<&str, i64> = HashMap::new();
    for d in &silver.deliveries {
        if let Some(owner) = order_owner.get(d.order_id.as_str()) {
            *deliveries.entry(*owner).or_default() += 1;
        }
    }

    let mut rows: Vec<CustomerAgg> = silver
        .customers
        .iter()
        .map(|c| {
            let id = c.customer_id.as_str();
            let (total_orders, total_spent) = orders
                .get(id)
                .map(|s| (s.orders, s.revenue))
                .unwrap_or((0, 0.0));
            let avg_order_amount = if total_orders > 0 {
                total_spent / total_orders as f64
            } else {
                0.0
            };
            CustomerAgg {
                customer_id: c.customer_id.clone(),
                first_name: c.first_name.clone(),
                last_name: c.last_name.clone(),
                email: c.email.clone(),
                city: c.city.clone(),
                signup_date: c.signup_date,
                age: c.age,
                customer_satisfaction_score: c.customer_satisfaction_score,
                loyalty_points: c.loyalty_points,
                age_group: c.age_group.clone(),
                total_orders,
                total_spent: round2(total_spent),
                avg_order_amount: round2(avg_order_amount),
                total_payments: payments.get(id).copied().unwrap_or(0),
                total_deliveries: deliveries.get(id).copied().unwrap_or(0),
                segment: segment(total_orders).to_string(),
            }
        })
        .collect();
    rows.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));
    rows
}

fn product_sales(silver: &SilverTables) -> HashMap<&str, OrderStats> {
    let mut sales: HashMap<&str, OrderStats> = HashMap::new();
    for o in &silver.orders {
        if let Some(pid) = o.product_id.as_deref() {
            sales.entry(pid).or_default().add(o.total_amount);
        }
    }
    sales
}

fn product_agg(silver: &SilverTables) -> Vec<ProductAgg> {
    let sales = product_sales(silver);
    let mut rows: Vec<ProductAgg> = silver
        .products
        .iter()
        .map(|p| {
            let (total_sold, total_revenue) = sales
                .get(p.product_id.as_str())
                .map(|s| (s.orders, s.revenue))
                .unwrap_or((0, 0.0));
            ProductAgg {
                product_id: p.product_id.clone(),
                name: p.name.clone(),
                category: p.category.clone(),
                price: p.price,
                stock: p.stock,
                rating: p.rating,
                discount_percent: p.discount_percent,
                return_rate: p.return_rate,
                brand: p.brand.clone(),
                total_sold,
                total_revenue: round2(total_revenue),
            }
        })
        .collect();
    rows.sort_by(|a, b| a.product_id.cmp(&b.product_id));
    rows
}

fn revenue_by<F>(silver: &SilverTables, key: F) -> Vec<DimensionRevenue>
where
    F: Fn(&crate::domain::Product) -> Option<&str>,
{
    #[derive(Default)]
    struct Bucket {
        products: i64,
        orders: i64,
        revenue: f64,
        ratings: Vec<f64>,
    }

    let sales = product_sales(silver);
    let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();
    for p in &silver.products {
        let name = key(p).unwrap_or(UNKNOWN_DIMENSION).to_string();
        let bucket = buckets.entry(name).or_default();
        bucket.products += 1;
        if let Some(r) = p.rating {
            bucket.ratings.push(r);
        }
        if let Some(s) = sales.get(p.product_id.as_str()) {
            bucket.orders += s.orders;
            bucket.revenue += s.revenue;
        }
    }

    buckets
        .into_iter()
        .map(|(key, b)| DimensionRevenue {
            key,
            product_count: b.products,
            total_orders: b.orders,
            total_revenue: round2(b.revenue),
            avg_rating: mean(b.ratings.into_iter()),
        })
        .collect()
}

fn monthly_activity(silver: &SilverTables) -> Vec<MonthlyActivity> {
    #[derive(Default)]
    struct Month<'a> {
        orders: i64,
        deliveries: i64,
        revenue: f64,
        per_customer: HashMap<&'a str, usize>,
    }

    let mut months: BTreeMap<String, Month<'_>> = BTreeMap::new();
    for o in &silver.orders {
        let m = months.entry(o.order_date.format("%Y-%m").to_string()).or_default();
        m.orders += 1;
        m.revenue += o.total_amount;
        *m.per_customer.entry(o.customer_id.as_str()).or_default() += 1;
    }
    for d in &silver.deliveries {
        if let Some(date) = d.delivery_date {
            months.entry(date.format("%Y-%m").to_string()).or_default().deliveries += 1;
        }
    }

    months
        .into_iter()
        .map(|(month, m)| MonthlyActivity {
            month,
            orders: m.orders,
            deliveries: m.deliveries,
            revenue: round2(m.revenue),
            distinct_customers: m.per_customer.len() as i64,
            repeat_customers: m
                .per_customer
                .values()
                .filter(|n| **n >= REPEAT_CUSTOMER_MIN_ORDERS)
                .count() as i64,
        })
        .collect()
}

/// Customer counts cover silver customers only; order and revenue totals
/// cover every silver order, with `orphan_orders` counting the ones whose
/// customer is not in silver.
fn overview(silver: &SilverTables) -> Overview {
    let known: HashSet<&str> = silver.customers.iter().map(|c| c.customer_id.as_str()).collect();
    let mut per_customer: HashMap<&str, usize> = HashMap::new();
    let mut orphan_orders = 0;
    let mut revenue = 0.0;
    for o in &silver.orders {
        let id = o.customer_id.as_str();
        if known.contains(id) {
            *per_customer.entry(id).or_default() += 1;
        } else {
            orphan_orders += 1;
        }
        revenue += o.total_amount;
    }
    let total_orders = silver.orders.len() as i64;

    Overview {
        total_customers: known.len() as i64,
        active_customers: per_customer.len() as i64,
        repeat_customers: per_customer
            .values()
            .filter(|n| **n >= REPEAT_CUSTOMER_MIN_ORDERS)
            .count() as i64,
        total_orders,
        orphan_orders,
        total_revenue: round2(revenue),
        avg_order_amount: if total_orders > 0 {
            round2(revenue / total_orders as f64)
        } else {
            0.0
        },
        avg_rating: mean(silver.products.iter().filter_map(|p| p.rating)),
        avg_satisfaction: mean(
            silver
                .customers
                .iter()
                .filter_map(|c| c.customer_satisfaction_score)
                .map(|s| s as f64),
        ),
    }
}

/// Report of the rows written per gold table
#[derive(Debug, Clone, Default)]
pub struct AggregateReport {
    pub silver_rows: usize,
    pub tables: Vec<(String, usize)>,
}

impl AggregateReport {
    pub fn rows_out(&self) -> usize {
        self.tables.iter().map(|(_, n)| n).sum()
    }
}

/// Gold stage runner
pub struct Aggregator {
    warehouse: Arc<dyn Warehouse>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("warehouse", &self.warehouse.backend())
            .finish()
    }
}

impl Aggregator {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    #[instrument(skip(self), fields(backend = self.warehouse.backend()))]
    pub async fn run(&self) -> Result<AggregateReport> {
        let silver = SilverTables::load(self.warehouse.as_ref()).await?;
        let silver_rows = silver.customers.len()
            + silver.products.len()
            + silver.orders.len()
            + silver.payments.len()
            + silver.deliveries.len();

        let gold = aggregate(&silver);
        let mut report = AggregateReport {
            silver_rows,
            tables: Vec::new(),
        };
        for table in gold.to_tables() {
            self.warehouse.replace_table(Layer::Gold, &table).await?;
            metrics::aggregate::table_written(&table.name, table.len());
            report.tables.push((table.name.clone(), table.len()));
        }

        let months: BTreeSet<&str> = gold.monthly_activity.iter().map(|m| m.month.as_str()).collect();
        info!(
            "📊 Built {} gold tables ({} rows) covering {} months",
            report.tables.len(),
            report.rows_out(),
            months.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Customer, Delivery, Order, Payment, Product};
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn customer(id: &str, satisfaction: Option<i64>) -> Customer {
        Customer {
            customer_id: id.to_string(),
            first_name: Some(format!("First {id}")),
            last_name: None,
            email: None,
            city: None,
            signup_date: Some(day(2023, 1, 1)),
            age: None,
            customer_satisfaction_score: satisfaction,
            loyalty_points: None,
            age_group: None,
        }
    }

    fn product(id: &str, brand: Option<&str>, rating: Option<f64>) -> Product {
        Product {
            product_id: id.to_string(),
            name: None,
            category: Some("Home".to_string()),
            price: Some(10.0),
            stock: Some(1),
            rating,
            discount_percent: None,
            return_rate: None,
            brand: brand.map(str::to_string),
        }
    }

    fn order(id: &str, customer: &str, product: &str, date: NaiveDate, amount: f64) -> Order {
        Order {
            order_id: id.to_string(),
            customer_id: customer.to_string(),
            product_id: Some(product.to_string()),
            order_date: date,
            total_amount: amount,
            payment_type: None,
            order_status: None,
            repeat_customer: None,
            cancellation_flag: None,
        }
    }

    fn silver() -> SilverTables {
        SilverTables {
            customers: vec![customer("C2", Some(4)), customer("C1", Some(3)), customer("C3", None)],
            products: vec![
                product("P1", Some("Acme"), Some(4.0)),
                product("P2", Some("Acme"), Some(3.5)),
                product("P3", None, None),
            ],
            orders: vec![
                order("O1", "C1", "P1", day(2024, 1, 5), 10.0),
                order("O2", "C1", "P2", day(2024, 1, 20), 20.0),
                order("O3", "C2", "P1", day(2024, 2, 2), 5.556),
            ],
            payments: vec![Payment {
                payment_id: "PM1".to_string(),
                order_id: "O1".to_string(),
                payment_date: Some(day(2024, 1, 5)),
                payment_type: None,
                payment_status: Some("success".to_string()),
                refund_flag: None,
            }],
            deliveries: vec![Delivery {
                delivery_id: "D1".to_string(),
                order_id: "O3".to_string(),
                delivery_date: Some(day(2024, 3, 1)),
                delivery_partner: None,
                delivery_status: None,
                customer_feedback: None,
            }],
        }
    }

    #[test]
    fn test_customer_agg_segments_and_order() {
        let gold = aggregate(&silver());
        let ids: Vec<&str> = gold.customer_agg.iter().map(|c| c.customer_id.as_str()).collect();
        assert_eq!(ids, vec!["C1", "C2", "C3"]);

        let c1 = &gold.customer_agg[0];
        assert_eq!(c1.total_orders, 2);
        assert_eq!(c1.total_spent, 30.0);
        assert_eq!(c1.avg_order_amount, 15.0);
        assert_eq!(c1.total_payments, 1);
        assert_eq!(c1.segment, SEGMENT_REPEAT);

        let c2 = &gold.customer_agg[1];
        assert_eq!(c2.total_spent, 5.56);
        assert_eq!(c2.total_deliveries, 1);
        assert_eq!(c2.segment, SEGMENT_ACTIVE);

        assert_eq!(gold.customer_agg[2].segment, SEGMENT_INACTIVE);
        assert_eq!(gold.customer_agg[2].avg_order_amount, 0.0);
    }

    #[test]
    fn test_dimension_revenue() {
        let gold = aggregate(&silver());
        assert_eq!(gold.brand_revenue.len(), 2);
        let acme = &gold.brand_revenue[0];
        assert_eq!(acme.key, "Acme");
        assert_eq!(acme.product_count, 2);
        assert_eq!(acme.total_orders, 3);
        assert_eq!(acme.total_revenue, 35.56);
        assert_eq!(acme.avg_rating, Some(3.75));
        assert_eq!(gold.brand_revenue[1].key, UNKNOWN_DIMENSION);
        assert_eq!(gold.brand_revenue[1].avg_rating, None);

        assert_eq!(gold.category_revenue.len(), 1);
        assert_eq!(gold.category_revenue[0].product_count, 3);
    }

    #[test]
    fn test_monthly_activity_counts_distinct_customers() {
        let gold = aggregate(&silver());
        let months: Vec<&str> = gold.monthly_activity.iter().map(|m| m.month.as_str()).collect();
        assert_eq!(months, vec!["2024-01", "2024-02", "2024-03"]);

        let jan = &gold.monthly_activity[0];
        assert_eq!(jan.orders, 2);
        assert_eq!(jan.distinct_customers, 1);
        assert_eq!(jan.repeat_customers, 1);
        assert_eq!(gold.monthly_activity[2].orders, 0);
        assert_eq!(gold.monthly_activity[2].deliveries, 1);
    }

    #[test]
    fn test_overview() {
        let gold = aggregate(&silver());
        let o = &gold.overview;
        assert_eq!(o.total_customers, 3);
        assert_eq!(o.active_customers, 2);
        assert_eq!(o.repeat_customers, 1);
        assert_eq!(o.total_orders, 3);
        assert_eq!(o.orphan_orders, 0);
        assert_eq!(o.total_revenue, 35.56);
        assert_eq!(o.avg_order_amount, 11.85);
        assert_eq!(o.avg_rating, Some(3.75));
        assert_eq!(o.avg_satisfaction, Some(3.5));
    }

    #[test]
    fn test_orders_from_unknown_customers_stay_out_of_customer_counts() {
        let mut silver = silver();
        silver.customers = vec![customer("C1", None)];
        silver.orders.push(order("O4", "C9", "P3", day(2024, 2, 10), 7.0));
        silver.orders.push(order("O5", "C8", "P3", day(2024, 2, 11), 3.0));

        let gold = aggregate(&silver);
        let o = &gold.overview;
        assert_eq!(o.total_customers, 1);
        assert_eq!(o.active_customers, 1);
        assert_eq!(o.repeat_customers, 1);
        assert!(o.active_customers <= o.total_customers);

        // every order is counted once, either against a customer or as an orphan
        assert_eq!(o.total_orders, 5);
        assert_eq!(o.orphan_orders, 3);
        let attributed: i64 = gold.customer_agg.iter().map(|c| c.total_orders).sum();
        assert_eq!(attributed + o.orphan_orders, o.total_orders);
    }

    #[test]
    fn test_gold_rows_carry_silver_columns() {
        let mut silver = silver();
        silver.customers[1].age = Some(34);
        silver.customers[1].loyalty_points = Some(120);
        silver.products[0].discount_percent = Some(15.0);
        silver.products[0].return_rate = Some(0.02);

        let gold = aggregate(&silver);
        let c1 = &gold.customer_agg[0];
        assert_eq!(c1.age, Some(34));
        assert_eq!(c1.customer_satisfaction_score, Some(3));
        assert_eq!(c1.loyalty_points, Some(120));
        let p1 = &gold.product_agg[0];
        assert_eq!(p1.discount_percent, Some(15.0));
        assert_eq!(p1.return_rate, Some(0.02));

        let tables = gold.to_tables();
        for name in Customer::columns().iter().map(|c| c.name.as_str()) {
            assert!(tables[0].column_index(name).is_some(), "customer_agg lacks {name}");
        }
        for name in Product::columns().iter().map(|c| c.name.as_str()) {
            assert!(tables[1].column_index(name).is_some(), "product_agg lacks {name}");
        }
    }

    #[test]
    fn test_empty_silver_gives_zeroed_overview() {
        let gold = aggregate(&SilverTables::default());
        assert!(gold.customer_agg.is_empty());
        assert_eq!(gold.overview.avg_order_amount, 0.0);
        assert_eq!(gold.to_tables()[5].len(), 1);
    }
}
