/// Sheet and table name constants to ensure consistency across the codebase.
/// Each spreadsheet tab lands in a bronze table of the same name.

pub const CUSTOMERS: &str = "customers";
pub const PRODUCTS: &str = "products";
pub const ORDERS: &str = "orders";
pub const PAYMENTS: &str = "payments";
pub const DELIVERY: &str = "delivery";

/// Tabs extracted on every run, in load order
pub const SHEET_NAMES: [&str; 5] = [CUSTOMERS, PRODUCTS, ORDERS, PAYMENTS, DELIVERY];

// Gold tables
pub const CUSTOMER_AGG: &str = "customer_agg";
pub const PRODUCT_AGG: &str = "product_agg";
pub const BRAND_REVENUE: &str = "brand_revenue";
pub const CATEGORY_REVENUE: &str = "category_revenue";
pub const MONTHLY_ACTIVITY: &str = "monthly_activity";
pub const OVERVIEW: &str = "overview";

pub const GOLD_TABLES: [&str; 6] = [
    CUSTOMER_AGG,
    PRODUCT_AGG,
    BRAND_REVENUE,
    CATEGORY_REVENUE,
    MONTHLY_ACTIVITY,
    OVERVIEW,
];

// Audit tables
pub const REJECTED_ROWS: &str = "rejected_rows";
pub const PIPELINE_RUNS: &str = "pipeline_runs";

// Data quality rule names recorded in the audit log
pub const RULE_MISSING_PK: &str = "MISSING_PK";
pub const RULE_MISSING_CUSTOMER: &str = "MISSING_CUSTOMER";
pub const RULE_MISSING_DATE: &str = "MISSING_DATE";
pub const RULE_INVALID_AMOUNT: &str = "INVALID_AMOUNT";
pub const RULE_TOTAL_AMT: &str = "TOTAL_AMT";
pub const RULE_AGE_RANGE: &str = "AGE_RANGE";
pub const RULE_PRICE_RANGE: &str = "PRICE_RANGE";
pub const RULE_STOCK_NEG: &str = "STOCK_NEG";
pub const RULE_DATE_LOGIC: &str = "DATE_LOGIC";
pub const RULE_PAYMENT_LOGIC: &str = "PAYMENT_LOGIC";
pub const RULE_DELIVERY_LOGIC: &str = "DELIVERY_LOGIC";
pub const RULE_DUPLICATE_KEY: &str = "DUPLICATE_KEY";

/// Customer segments in the gold customer table
pub const SEGMENT_INACTIVE: &str = "inactive";
pub const SEGMENT_ACTIVE: &str = "active";
pub const SEGMENT_REPEAT: &str = "repeat";

/// Orders needed in a period before a customer counts as repeat
pub const REPEAT_CUSTOMER_MIN_ORDERS: usize = 2;
