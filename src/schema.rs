//! Expected shape of each spreadsheet tab and the conversion of a fetched
//! sheet into an all-text bronze table.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::constants::{CUSTOMERS, DELIVERY, ORDERS, PAYMENTS, PRODUCTS};
use crate::error::{EtlError, Result};
use crate::types::{Column, RawSheet, Table, Value};

/// Columns of one spreadsheet tab. Bronze stores every column as text.
#[derive(Debug, Clone, Copy)]
pub struct SheetSchema {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub required: &'static [&'static str],
}

pub const SHEET_SCHEMAS: [SheetSchema; 5] = [
    SheetSchema {
        name: CUSTOMERS,
        columns: &[
            "customer_id",
            "first_name",
            "last_name",
            "email",
            "city",
            "signup_date",
            "age",
            "customer_satisfaction_score",
            "loyalty_points",
            "age_group",
        ],
        required: &["customer_id"],
    },
    SheetSchema {
        name: PRODUCTS,
        columns: &[
            "product_id",
            "name",
            "category",
            "price",
            "stock",
            "rating",
            "discount_percent",
            "return_rate",
            "brand",
        ],
        required: &["product_id"],
    },
    SheetSchema {
        name: ORDERS,
        columns: &[
            "order_id",
            "customer_id",
            "product_id",
            "order_date",
            "total_amount",
            "payment_type",
            "order_status",
            "repeat_customer",
            "cancellation_flag",
        ],
        required: &["order_id", "customer_id", "order_date", "total_amount"],
    },
    SheetSchema {
        name: PAYMENTS,
        columns: &[
            "payment_id",
            "order_id",
            "payment_date",
            "payment_type",
            "payment_status",
            "refund_flag",
        ],
        required: &["payment_id", "order_id"],
    },
    SheetSchema {
        name: DELIVERY,
        columns: &[
            "delivery_id",
            "order_id",
            "delivery_date",
            "delivery_partner",
            "delivery_status",
            "customer_feedback",
        ],
        required: &["delivery_id", "order_id"],
    },
];

/// Header spellings seen in the source workbook, mapped to canonical names
const HEADER_ALIASES: [(&str, &str); 3] = [
    ("paymnt_date", "payment_date"),
    ("deliver_date", "delivery_date"),
    ("amount", "total_amount"),
];

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

pub fn schema_for(name: &str) -> Option<&'static SheetSchema> {
    SHEET_SCHEMAS.iter().find(|s| s.name == name)
}

/// Trim, lower-case, collapse whitespace to `_`, then resolve aliases.
pub fn normalize_header(header: &str) -> String {
    let lowered = header.trim().to_lowercase();
    let collapsed = WHITESPACE.replace_all(&lowered, "_").into_owned();
    HEADER_ALIASES
        .iter()
        .find(|(alias, _)| *alias == collapsed)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(collapsed)
}

impl SheetSchema {
    pub fn bronze_columns(&self) -> Vec<Column> {
        self.columns.iter().map(|c| Column::text(c)).collect()
    }

    /// Required columns absent from `present`.
    pub fn missing_required<S: AsRef<str>>(&self, present: &[S]) -> Vec<String> {
        self.required
            .iter()
            .filter(|req| !present.iter().any(|p| p.as_ref() == **req))
            .map(|req| req.to_string())
            .collect()
    }

    /// Map a fetched sheet onto this schema. Cell text is kept verbatim;
    /// empty cells become Null, absent optional columns are Null, and
    /// columns the schema does not know are dropped.
    pub fn conform(&self, sheet: &RawSheet) -> Result<Table> {
        let headers: Vec<String> = sheet.headers.iter().map(|h| normalize_header(h)).collect();

        let missing = self.missing_required(&headers);
        if !missing.is_empty() {
            return Err(EtlError::schema_mismatch(self.name, missing));
        }

        let unknown: Vec<&String> = headers
            .iter()
            .filter(|h| !h.is_empty() && !self.columns.contains(&h.as_str()))
            .collect();
        if !unknown.is_empty() {
            warn!(sheet = self.name, ?unknown, "Dropping columns not in the bronze schema");
        }

        // For each schema column, the first sheet column carrying it
        let positions: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|col| headers.iter().position(|h| h == col))
            .collect();

        let mut table = Table::new(self.name, self.bronze_columns());
        for raw_row in &sheet.rows {
            // Fully blank lines are spreadsheet padding, not records
            if raw_row
                .iter()
                .all(|c| c.as_deref().map_or(true, |s| s.trim().is_empty()))
            {
                continue;
            }
            let row = positions
                .iter()
                .map(|pos| {
                    pos.and_then(|i| raw_row.get(i).cloned().flatten())
                        .filter(|s| !s.trim().is_empty())
                        .map(Value::Text)
                        .unwrap_or(Value::Null)
                })
                .collect();
            table.push_row(row);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(headers: &[&str], rows: &[&[&str]]) -> RawSheet {
        RawSheet {
            name: "orders".to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| Some(c.to_string())).collect())
                .collect(),
            digest: String::new(),
        }
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  Customer ID "), "customer_id");
        assert_eq!(normalize_header("Paymnt_Date"), "payment_date");
        assert_eq!(normalize_header("deliver_date"), "delivery_date");
        assert_eq!(normalize_header("Order   Date"), "order_date");
    }

    #[test]
    fn test_conform_maps_columns_and_nulls() {
        let schema = schema_for(ORDERS).unwrap();
        let raw = sheet(
            &["Order ID", "Customer ID", "Order Date", "Amount", "Notes"],
            &[&["O1", "C1", "2024-01-02", " 10.50 ", "x"], &["O2", "", "2024-01-03", "5", ""], &["", "", "", "", ""]],
        );

        let table = schema.conform(&raw).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.columns.len(), schema.columns.len());

        let first = table.row(0);
        assert_eq!(first.text("order_id").as_deref(), Some("O1"));
        // Bronze keeps the cell text untouched
        assert_eq!(first.text("total_amount").as_deref(), Some(" 10.50 "));
        assert!(first.get("product_id").is_null());
        assert!(table.row(1).get("customer_id").is_null());
    }

    #[test]
    fn test_conform_rejects_missing_required_column() {
        let schema = schema_for(ORDERS).unwrap();
        let raw = sheet(&["order_id", "order_date"], &[&["O1", "2024-01-02"]]);

        match schema.conform(&raw) {
            Err(EtlError::SchemaMismatch { table, missing }) => {
                assert_eq!(table, "orders");
                assert_eq!(missing, vec!["customer_id".to_string(), "total_amount".to_string()]);
            }
            other => panic!("expected schema mismatch, got {:?}", other),
        }
    }
}
