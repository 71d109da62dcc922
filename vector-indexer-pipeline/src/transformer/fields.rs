//! Field-level conversions used by the record transformer.

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;

use vector_indexer_shared::{NumericValue, RejectReason};

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M"];

/// Strip control characters and collapse whitespace runs into single spaces.
pub fn clean_text(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| c.is_whitespace() || !c.is_control())
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text of a scalar field, cleaned. `None` for null or blank values.
pub fn scalar_text(field: &str, value: &Value) -> Result<Option<String>, RejectReason> {
    let text = match value {
        Value::Null => return Ok(None),
        Value::String(s) => clean_text(s),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(_) | Value::Object(_) => {
            return Err(incompatible(field, "a string, number or boolean"))
        }
    };
    Ok(if text.is_empty() { None } else { Some(text) })
}

/// Restrict tokens carried by a field: one per scalar, or one per array element.
pub fn restrict_tokens(field: &str, value: &Value) -> Result<Vec<String>, RejectReason> {
    match value {
        Value::Array(values) => {
            let mut tokens = Vec::with_capacity(values.len());
            for value in values {
                if matches!(value, Value::Array(_)) {
                    return Err(incompatible(field, "a scalar or a list of scalars"));
                }
                tokens.extend(scalar_text(field, value)?);
            }
            Ok(tokens)
        }
        Value::Object(_) => Err(incompatible(field, "a scalar or a list of scalars")),
        scalar => Ok(scalar_text(field, scalar)?.into_iter().collect()),
    }
}

/// Numeric restrict value of a field.
///
/// Integers become `ValueInt` and floats `ValueFloat`. Strings are parsed as
/// numbers, or as timestamps (epoch seconds) when `timestamp` is set.
pub fn numeric_value(
    field: &str,
    value: &Value,
    timestamp: bool,
) -> Result<Option<NumericValue>, RejectReason> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => match n.as_i64() {
            Some(int) => Ok(Some(NumericValue::ValueInt(int))),
            None => n
                .as_f64()
                .map(|float| Some(NumericValue::ValueFloat(float)))
                .ok_or_else(|| incompatible(field, "a number")),
        },
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            if timestamp {
                if let Some(epoch) = parse_timestamp(s) {
                    return Ok(Some(NumericValue::ValueInt(epoch)));
                }
            }
            if let Ok(int) = s.parse::<i64>() {
                return Ok(Some(NumericValue::ValueInt(int)));
            }
            match s.parse::<f64>() {
                Ok(float) if float.is_finite() => Ok(Some(NumericValue::ValueFloat(float))),
                _ if timestamp => Err(incompatible(field, "a number or a timestamp")),
                _ => Err(incompatible(field, "a number")),
            }
        }
        _ if timestamp => Err(incompatible(field, "a number or a timestamp")),
        _ => Err(incompatible(field, "a number")),
    }
}

/// Parse a timestamp into epoch seconds. Naive formats are read as UTC.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.timestamp());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc().timestamp())
}

fn incompatible(field: &str, expected: &str) -> RejectReason {
    RejectReason::IncompatibleType {
        field: field.to_string(),
        expected: expected.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Intro\tto Ru\u{0007}st \n\n basics "), "Intro to Rust basics");
        assert_eq!(clean_text("\u{0000}\u{001b}"), "");
    }

    #[test]
    fn test_restrict_tokens() {
        assert_eq!(restrict_tokens("tags", &json!(["a", 2, null])).unwrap(), vec!["a", "2"]);
        assert_eq!(restrict_tokens("level", &json!("Beginner")).unwrap(), vec!["Beginner"]);
        assert!(restrict_tokens("tags", &json!({"a": 1})).is_err());
    }

    #[test]
    fn test_numeric_values() {
        assert_eq!(
            numeric_value("score", &json!(3), false).unwrap(),
            Some(NumericValue::ValueInt(3))
        );
        assert_eq!(
            numeric_value("score", &json!(2.5), false).unwrap(),
            Some(NumericValue::ValueFloat(2.5))
        );
        assert_eq!(
            numeric_value("score", &json!("7"), false).unwrap(),
            Some(NumericValue::ValueInt(7))
        );
        assert!(numeric_value("score", &json!("high"), false).is_err());
        assert!(numeric_value("score", &json!(true), false).is_err());
    }

    #[test]
    fn test_timestamp_formats() {
        assert_eq!(parse_timestamp("2023-11-14T22:13:20Z"), Some(1_700_000_000));
        assert_eq!(parse_timestamp("2023-11-14T23:13:20+01:00"), Some(1_700_000_000));
        assert_eq!(parse_timestamp("2023-11-14 22:13:20"), Some(1_700_000_000));
        assert_eq!(parse_timestamp("2023-11-14T22:13:20"), Some(1_700_000_000));
        assert_eq!(parse_timestamp("14/11/2023 22:13"), Some(1_699_999_980));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
