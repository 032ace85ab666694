//! Custom askama filters. Field arguments arrive borrowed and method-call
//! arguments by value, hence the `Borrow` bounds.

use std::borrow::Borrow;

use askama::Result;
use chrono::{DateTime, Local, NaiveDate, Utc};
use rust_decimal::Decimal;

// Check if a Vec<String> contains a specific string, as `|contains("value")`.
pub fn contains<T: Borrow<Vec<String>>>(s: T, v: &str) -> Result<bool> {
    Ok(s.borrow().iter().any(|item| item == v))
}

/// Quantities without trailing zeros: `3.00` renders as `3`, `2.50` as `2.5`.
pub fn decimal<T: Borrow<Decimal>>(value: T) -> Result<String> {
    Ok(format_decimal(*value.borrow()))
}

pub fn opt_decimal<T: Borrow<Option<Decimal>>>(value: T) -> Result<String> {
    Ok(value.borrow().map(format_decimal).unwrap_or_default())
}

pub fn opt_int<T: Borrow<Option<i32>>>(value: T) -> Result<String> {
    Ok(value.borrow().map(|v| v.to_string()).unwrap_or_default())
}

pub fn opt_str<T: Borrow<Option<String>>>(value: T) -> Result<String> {
    Ok(value.borrow().clone().unwrap_or_default())
}

pub fn datetime<T: Borrow<DateTime<Utc>>>(value: T) -> Result<String> {
    Ok(format_datetime(value.borrow()))
}

pub fn opt_datetime<T: Borrow<Option<DateTime<Utc>>>>(value: T) -> Result<String> {
    Ok(value.borrow().as_ref().map(format_datetime).unwrap_or_default())
}

pub fn date<T: Borrow<NaiveDate>>(value: T) -> Result<String> {
    Ok(value.borrow().format("%Y-%m-%d").to_string())
}

pub fn yes_no<T: Borrow<bool>>(value: T) -> Result<&'static str> {
    Ok(if *value.borrow() { "是" } else { "否" })
}

pub fn format_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_drops_trailing_zeros() {
        assert_eq!(decimal(Decimal::new(300, 2)).unwrap(), "3");
        assert_eq!(decimal(&Decimal::new(250, 2)).unwrap(), "2.5");
        assert_eq!(opt_decimal(None::<Decimal>).unwrap(), "");
        assert_eq!(opt_decimal(&Some(Decimal::new(-125, 2))).unwrap(), "-1.25");
    }

    #[test]
    fn test_contains() {
        let groups = vec!["申請人員".to_string()];
        assert!(contains(&groups, "申請人員").unwrap());
        assert!(!contains(&groups, "撥料人員").unwrap());
    }

    #[test]
    fn test_optional_values_render_blank() {
        assert_eq!(opt_int(None::<i32>).unwrap(), "");
        assert_eq!(opt_int(Some(4)).unwrap(), "4");
        assert_eq!(opt_str(&Some("B-01".to_string())).unwrap(), "B-01");
        assert_eq!(yes_no(true).unwrap(), "是");
    }
}
