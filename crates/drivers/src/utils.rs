use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use exchange_core::{BookLevel, ExchangeError, Result};
use rust_decimal::Decimal;
use serde_json::Value;

/// Parse a decimal sent as a JSON string.
pub fn parse_decimal(field: &str, raw: &str) -> Result<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|err| ExchangeError::Format(format!("invalid {field} '{raw}': {err}")))
}

/// Convert a decimal sent as a JSON number.
pub fn decimal_from_f64(field: &str, value: f64) -> Result<Decimal> {
    Decimal::try_from(value)
        .map(|value| value.normalize())
        .map_err(|err| ExchangeError::Format(format!("invalid {field} {value}: {err}")))
}

/// Accepts either encoding.
pub fn decimal_from_value(field: &str, value: &Value) -> Result<Decimal> {
    match value {
        Value::String(raw) => parse_decimal(field, raw),
        Value::Number(number) => match number.as_f64() {
            Some(value) => decimal_from_f64(field, value),
            None => Err(ExchangeError::Format(format!("invalid {field} {number}"))),
        },
        other => Err(ExchangeError::Format(format!("invalid {field} {other}"))),
    }
}

/// `[price, amount, ...]` as sent by array-style depth endpoints. Extra
/// trailing elements (timestamps, ignored lists) are skipped.
pub fn parse_level(entry: &[Value]) -> Result<BookLevel> {
    match entry {
        [price, amount, ..] => Ok(BookLevel::new(
            decimal_from_value("price", price)?,
            decimal_from_value("amount", amount)?,
        )),
        _ => Err(ExchangeError::Format(format!(
            "order book level needs price and amount, got {} fields",
            entry.len()
        ))),
    }
}

pub fn parse_levels(entries: &[Vec<Value>]) -> Result<Vec<BookLevel>> {
    entries.iter().map(|entry| parse_level(entry)).collect()
}

pub fn from_unix_seconds(seconds: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| ExchangeError::Format(format!("invalid timestamp {seconds}")))
}

pub fn from_unix_millis(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| ExchangeError::Format(format!("invalid timestamp {millis}")))
}

/// Fractional seconds, e.g. Kraken's `opentm`.
pub fn from_unix_seconds_f64(seconds: f64) -> Result<DateTime<Utc>> {
    from_unix_millis((seconds * 1_000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[rstest]
    #[case("0.01000000", dec!(0.01))]
    #[case("  42 ", dec!(42))]
    #[case("1e-5", dec!(0.00001))]
    fn parses_decimal_strings(#[case] raw: &str, #[case] expected: Decimal) {
        assert_eq!(parse_decimal("price", raw).unwrap(), expected);
    }

    #[test]
    fn rejects_garbage_as_format_error() {
        let err = parse_decimal("price", "abc").unwrap_err();
        assert!(matches!(err, ExchangeError::Format(_)));
        assert!(err.to_string().contains("price"));
    }

    #[test]
    fn converts_json_floats() {
        assert_eq!(decimal_from_f64("rate", 0.05).unwrap(), dec!(0.05));
        assert!(decimal_from_f64("rate", f64::NAN).is_err());
    }

    #[test]
    fn levels_accept_strings_numbers_and_trailing_fields() {
        let level = parse_level(&[json!("100.5"), json!("2"), json!(1_499_040_000)]).unwrap();
        assert_eq!(level, BookLevel::new(dec!(100.5), dec!(2)));

        let level = parse_level(&[json!(0.031), json!(12.5)]).unwrap();
        assert_eq!(level, BookLevel::new(dec!(0.031), dec!(12.5)));

        assert!(parse_level(&[json!("1")]).is_err());
    }

    #[test]
    fn timestamps() {
        assert_eq!(from_unix_millis(1_499_827_319_559).unwrap().timestamp(), 1_499_827_319);
        assert_eq!(
            from_unix_seconds_f64(1_499_827_319.25).unwrap().timestamp_millis(),
            1_499_827_319_250
        );
    }
}
