//! Text-to-type coercion for bronze cells.
//!
//! Every function takes the raw cell as landed and returns `None` when the
//! value is blank or cannot be read as the target type.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%m-%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Placeholder strings spreadsheet exports use for empty cells
const NULL_MARKERS: [&str; 5] = ["nan", "null", "none", "n/a", "na"];

/// Trimmed text, with blanks and null markers mapped to `None`.
pub fn text(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() || NULL_MARKERS.iter().any(|m| trimmed.eq_ignore_ascii_case(m)) {
        return None;
    }
    Some(trimmed.to_string())
}

pub fn email(raw: Option<&str>) -> Option<String> {
    text(raw).map(|e| e.to_lowercase())
}

pub fn date(raw: Option<&str>) -> Option<NaiveDate> {
    let s = text(raw)?;
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(&s, fmt) {
            return Some(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.date_naive())
}

/// Numbers may carry currency symbols, thousands separators or a percent sign.
pub fn number(raw: Option<&str>) -> Option<f64> {
    let s = text(raw)?;
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '₹' | ',' | '%') && !c.is_whitespace())
        .collect();
    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Whole numbers only; `"25.0"` reads as 25, `"25.5"` does not read.
pub fn integer(raw: Option<&str>) -> Option<i64> {
    let f = number(raw)?;
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

pub fn boolean(raw: Option<&str>) -> Option<bool> {
    match text(raw)?.to_lowercase().as_str() {
        "y" | "yes" | "true" | "t" | "1" => Some(true),
        "n" | "no" | "false" | "f" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_trims_and_drops_blanks() {
        assert_eq!(text(Some("  Pune ")), Some("Pune".to_string()));
        assert_eq!(text(Some("   ")), None);
        assert_eq!(text(Some("NaN")), None);
        assert_eq!(text(None), None);
        assert_eq!(email(Some(" A.Shah@Example.COM ")), Some("a.shah@example.com".to_string()));
    }

    #[test]
    fn test_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15);
        assert_eq!(date(Some("2024-03-15")), expected);
        assert_eq!(date(Some("2024/03/15")), expected);
        assert_eq!(date(Some("03/15/2024")), expected);
        assert_eq!(date(Some("15-03-2024")), expected);
        assert_eq!(date(Some("2024-03-15 10:30:00")), expected);
        assert_eq!(date(Some("2024-03-15T10:30:00+00:00")), expected);
        assert_eq!(date(Some("2024-02-30")), None);
        assert_eq!(date(Some("soon")), None);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(number(Some("$1,299.50")), Some(1299.5));
        assert_eq!(number(Some("12%")), Some(12.0));
        assert_eq!(number(Some("-3")), Some(-3.0));
        assert_eq!(number(Some("abc")), None);
        assert_eq!(number(Some("inf")), None);
        assert_eq!(integer(Some("25.0")), Some(25));
        assert_eq!(integer(Some("25.5")), None);
        assert_eq!(integer(Some("1,200")), Some(1200));
    }

    #[test]
    fn test_booleans() {
        assert_eq!(boolean(Some("Yes")), Some(true));
        assert_eq!(boolean(Some("y")), Some(true));
        assert_eq!(boolean(Some("1")), Some(true));
        assert_eq!(boolean(Some("FALSE")), Some(false));
        assert_eq!(boolean(Some("n")), Some(false));
        assert_eq!(boolean(Some("maybe")), None);
    }
}
