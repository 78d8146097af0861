use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use sheets_etl::constants::*;
use sheets_etl::error::EtlError;
use sheets_etl::pipeline::aggregate::gold_columns;
use sheets_etl::pipeline::{Pipeline, SilverTables, Stage, StageOutcome};
use sheets_etl::source::CsvDirectorySource;
use sheets_etl::storage::{read_conforming, SqliteWarehouse, Warehouse};
use sheets_etl::types::{Column, ColumnType, Layer, Table};
use tempfile::TempDir;

const CUSTOMERS_CSV: &str = "\
Customer ID,First Name,Last Name,Email,City,Signup Date,Age,Customer Satisfaction Score,Loyalty Points,Age Group
C1,Asha,Rao,ASHA@EXAMPLE.COM,Pune,2023-01-05,31,4,120,25-34
C2,Ben,Lee,ben@example.com,Delhi,2023/02/10,45,5,80,35-44
C3,Cara,Diaz,cara@example.com,Mumbai,03/01/2023,28,3,10,25-34
C2,Ben,Dup,ben2@example.com,Delhi,2023-02-10,45,5,80,35-44
,NoId,Person,x@example.com,Goa,2023-01-01,30,2,0,25-34
";

const PRODUCTS_CSV: &str = "\
product_id,name,category,price,stock,rating,discount_percent,return_rate,brand
P1,Lamp,Home,\"$1,200.00\",10,4.5,10%,0.02,Acme
P2,Mug,Kitchen,15,100,4.0,0,0.01,Acme
P3,Broken,Home,0,5,3.0,0,0,Zen
";

const ORDERS_CSV: &str = "\
order_id,customer_id,product_id,order_date,amount,payment_type,order_status,repeat_customer,cancellation_flag
O1,C1,P1,2024-01-10,1200,card,delivered,no,no
O2,C1,P2,2024-01-15,15,upi,delivered,yes,no
O2,C1,P2,2024-01-15,15,upi,delivered,yes,no
O3,C2,P2,2024-02-01,30,card,cancelled,no,yes
O4,,P1,2024-02-02,20,card,delivered,no,no
O5,C3,P1,2022-12-01,50,card,delivered,no,no
";

const PAYMENTS_CSV: &str = "\
payment_id,order_id,paymnt_date,payment_type,payment_status,refund_flag
PM1,O1,2024-01-10,card,success,no
PM2,O2,2024-01-16,upi,success,no
PM3,O3,2024-02-01,card,success,no
";

const DELIVERY_CSV: &str = "\
delivery_id,order_id,delivery_date,delivery_partner,delivery_status,customer_feedback
D1,O1,2024-01-12,BlueDart,delivered,good
D2,O2,2024-02-03,Delhivery,delivered,
D3,O2,2024-01-01,Delhivery,delivered,
";

struct Fixture {
    _dir: TempDir,
    sheets: std::path::PathBuf,
    export: std::path::PathBuf,
    warehouse: Arc<SqliteWarehouse>,
}

fn write_sheets(dir: &Path, skip: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    for (name, body) in [
        (CUSTOMERS, CUSTOMERS_CSV),
        (PRODUCTS, PRODUCTS_CSV),
        (ORDERS, ORDERS_CSV),
        (PAYMENTS, PAYMENTS_CSV),
        (DELIVERY, DELIVERY_CSV),
    ] {
        if !skip.contains(&name) {
            fs::write(dir.join(format!("{}.csv", name)), body).unwrap();
        }
    }
}

fn fixture(skip: &[&str]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let sheets = dir.path().join("sheets");
    write_sheets(&sheets, skip);
    let warehouse = Arc::new(SqliteWarehouse::open(dir.path().join("etl.db")).unwrap());
    Fixture {
        export: dir.path().join("export"),
        sheets,
        warehouse,
        _dir: dir,
    }
}

impl Fixture {
    fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.warehouse.clone())
            .with_source(Arc::new(CsvDirectorySource::new(&self.sheets)))
            .with_export_dir(&self.export)
    }

    async fn gold(&self, name: &str) -> Table {
        let columns = gold_columns(name).unwrap();
        read_conforming(self.warehouse.as_ref(), Layer::Gold, name, &columns, &[])
            .await
            .unwrap()
    }

    async fn audit_rows(&self, name: &str, columns: &[&str]) -> Table {
        let columns: Vec<Column> = columns.iter().map(|c| Column::new(c, ColumnType::Text)).collect();
        self.warehouse
            .read_table(Layer::Audit, name, &columns)
            .await
            .unwrap()
    }

    async fn exists(&self, layer: Layer, name: &str) -> bool {
        self.warehouse.table_columns(layer, name).await.unwrap().is_some()
    }
}

#[tokio::test]
async fn test_full_run_cleans_aggregates_and_exports() {
    let fx = fixture(&[]);
    let summary = fx.pipeline().run_all().await.unwrap();
    assert_eq!(summary.outcomes.len(), 4);

    let report = summary.clean_report().unwrap();
    assert_eq!(report.table(CUSTOMERS).unwrap().rows_out, 3);
    assert_eq!(report.table(ORDERS).unwrap().rejected, 3);
    assert_eq!(report.rows_rejected(), 8);

    let silver = SilverTables::load(fx.warehouse.as_ref()).await.unwrap();
    let customer_ids: Vec<&str> = silver.customers.iter().map(|c| c.customer_id.as_str()).collect();
    assert_eq!(customer_ids, vec!["C1", "C2", "C3"]);
    assert_eq!(silver.customers[0].email.as_deref(), Some("asha@example.com"));
    assert_eq!(silver.products[0].price, Some(1200.0));
    assert_eq!(silver.orders.len(), 3);
    assert_eq!(silver.payments.len(), 2);
    assert_eq!(silver.deliveries.len(), 2);

    let rejected = fx
        .audit_rows(REJECTED_ROWS, &["table_name", "rule_name", "run_id"])
        .await;
    assert_eq!(rejected.len(), 8);
    let rules: HashSet<String> = rejected.iter_rows().filter_map(|r| r.text("rule_name")).collect();
    for rule in [
        RULE_MISSING_PK,
        RULE_DUPLICATE_KEY,
        RULE_PRICE_RANGE,
        RULE_MISSING_CUSTOMER,
        RULE_DATE_LOGIC,
        RULE_PAYMENT_LOGIC,
        RULE_DELIVERY_LOGIC,
    ] {
        assert!(rules.contains(rule), "missing audit rows for {}", rule);
    }
    assert_eq!(rejected.row(0).text("run_id"), Some(summary.run_id.to_string()));

    let customers = fx.gold(CUSTOMER_AGG).await;
    let c1 = customers.row(0);
    assert_eq!(c1.text("customer_id"), Some("C1".to_string()));
    assert_eq!(c1.int("total_orders"), Some(2));
    assert_eq!(c1.real("total_spent"), Some(1215.0));
    assert_eq!(c1.real("avg_order_amount"), Some(607.5));
    assert_eq!(c1.int("total_payments"), Some(2));
    assert_eq!(c1.int("total_deliveries"), Some(2));
    assert_eq!(c1.text("segment"), Some(SEGMENT_REPEAT.to_string()));
    assert_eq!(customers.row(2).text("segment"), Some(SEGMENT_INACTIVE.to_string()));
    assert_eq!(c1.int("age"), Some(31));
    assert_eq!(c1.int("customer_satisfaction_score"), Some(4));
    assert_eq!(c1.int("loyalty_points"), Some(120));
    assert_eq!(c1.text("age_group"), Some("25-34".to_string()));

    let products = fx.gold(PRODUCT_AGG).await;
    let p1 = products.row(0);
    assert_eq!(p1.text("product_id"), Some("P1".to_string()));
    assert_eq!(p1.real("discount_percent"), Some(10.0));
    assert_eq!(p1.real("return_rate"), Some(0.02));
    assert_eq!(p1.int("total_sold"), Some(1));

    let overview = fx.gold(OVERVIEW).await;
    assert_eq!(overview.len(), 1);
    assert_eq!(overview.row(0).int("total_customers"), Some(3));
    assert_eq!(overview.row(0).int("active_customers"), Some(2));
    assert_eq!(overview.row(0).int("orphan_orders"), Some(0));
    assert_eq!(overview.row(0).real("total_revenue"), Some(1245.0));
    assert_eq!(overview.row(0).real("avg_order_amount"), Some(415.0));

    for name in GOLD_TABLES {
        let path = fx.export.join(format!("{}.csv", name));
        assert!(path.exists(), "missing export {}", path.display());
    }
    let exported = fs::read_to_string(fx.export.join("customer_agg.csv")).unwrap();
    assert!(exported.starts_with("customer_id,first_name,"));
    let header = exported.lines().next().unwrap();
    for column in ["age", "customer_satisfaction_score", "loyalty_points"] {
        assert!(header.split(',').any(|h| h == column), "export lacks {}", column);
    }
    assert_eq!(exported.lines().count(), 4);

    let runs = fx.audit_rows(PIPELINE_RUNS, &["stage", "status"]).await;
    let stages: Vec<String> = runs.iter_rows().filter_map(|r| r.text("stage")).collect();
    assert_eq!(stages, vec!["bronze", "silver", "gold", "export"]);
    assert!(runs.iter_rows().all(|r| r.text("status").as_deref() == Some("succeeded")));
}

#[tokio::test]
async fn test_monthly_distinct_customers_match_silver() {
    let fx = fixture(&[]);
    fx.pipeline().run_all().await.unwrap();

    let silver = SilverTables::load(fx.warehouse.as_ref()).await.unwrap();
    let mut expected: HashMap<String, HashSet<String>> = HashMap::new();
    for o in &silver.orders {
        expected
            .entry(o.order_date.format("%Y-%m").to_string())
            .or_default()
            .insert(o.customer_id.clone());
    }

    let monthly = fx.gold(MONTHLY_ACTIVITY).await;
    assert_eq!(monthly.len(), 2);
    for row in monthly.iter_rows() {
        let month = row.text("month").unwrap();
        let distinct = expected.get(&month).map(|s| s.len()).unwrap_or(0);
        assert_eq!(row.int("distinct_customers"), Some(distinct as i64), "month {}", month);
    }
    assert_eq!(monthly.row(0).int("repeat_customers"), Some(1));
    assert_eq!(monthly.row(1).int("deliveries"), Some(1));
}

#[tokio::test]
async fn test_rerun_gives_identical_gold() {
    let fx = fixture(&[]);
    fx.pipeline().run_all().await.unwrap();
    let mut first = Vec::new();
    for name in GOLD_TABLES {
        first.push(fx.gold(name).await);
    }

    fx.pipeline().run_all().await.unwrap();
    for (name, before) in GOLD_TABLES.iter().zip(first) {
        assert_eq!(fx.gold(name).await, before, "gold.{} changed between runs", name);
    }

    // the audit log is append-only across runs
    let rejected = fx.audit_rows(REJECTED_ROWS, &["run_id"]).await;
    assert_eq!(rejected.len(), 16);
}

#[tokio::test]
async fn test_unreachable_source_writes_no_layers() {
    let fx = fixture(&[PAYMENTS]);
    let err = fx.pipeline().run_all().await.unwrap_err();
    assert!(matches!(err, EtlError::SourceUnreachable(_)));

    for layer in [Layer::Bronze, Layer::Silver] {
        for name in SHEET_NAMES {
            assert!(!fx.exists(layer, name).await, "{}.{} was written", layer, name);
        }
    }
    for name in GOLD_TABLES {
        assert!(!fx.exists(Layer::Gold, name).await);
    }

    let runs = fx.audit_rows(PIPELINE_RUNS, &["stage", "status", "detail"]).await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs.row(0).text("status"), Some("failed".to_string()));
    assert!(runs.row(0).text("detail").unwrap().starts_with("source_unreachable"));
}

#[tokio::test]
async fn test_missing_required_column_aborts_extract() {
    let fx = fixture(&[]);
    fs::write(
        fx.sheets.join("orders.csv"),
        "order_id,customer_id,amount\nO1,C1,10\n",
    )
    .unwrap();

    match fx.pipeline().run_stage(Stage::Extract).await {
        Err(EtlError::SchemaMismatch { table, missing }) => {
            assert_eq!(table, ORDERS);
            assert_eq!(missing, vec!["order_date".to_string()]);
        }
        other => panic!("expected schema mismatch, got {:?}", other),
    }
    assert!(!fx.exists(Layer::Bronze, CUSTOMERS).await);
}

#[tokio::test]
async fn test_stages_run_separately() {
    let fx = fixture(&[]);
    let pipeline = fx.pipeline();

    assert!(matches!(
        pipeline.run_stage(Stage::Extract).await.unwrap(),
        StageOutcome::Extracted(_)
    ));
    // gold needs silver first
    assert!(matches!(
        pipeline.run_stage(Stage::Aggregate).await,
        Err(EtlError::SchemaMismatch { .. })
    ));
    pipeline.run_stage(Stage::Clean).await.unwrap();
    match pipeline.run_stage(Stage::Aggregate).await.unwrap() {
        StageOutcome::Aggregated(report) => assert_eq!(report.tables.len(), GOLD_TABLES.len()),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(fx.exists(Layer::Gold, PRODUCT_AGG).await);
}
