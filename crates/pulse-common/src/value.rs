//! Duck-typed parsing for upstream JSON values.
//!
//! Upstream payloads are loosely typed: numerics arrive as strings or
//! numbers, arrays arrive as JSON-encoded strings, timestamps arrive as
//! RFC3339 strings, epoch seconds, or millisecond-epoch strings. These
//! helpers normalize all of that into canonical Rust types.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

/// Parse a JSON value that should be a string array but may arrive as an
/// actual array or as a JSON-encoded string (`"[\"a\", \"b\"]"`).
pub fn parse_jsonish_array(value: Option<&Value>) -> Vec<String> {
    let value = match value {
        Some(v) => v,
        None => return Vec::new(),
    };

    match value {
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(item_to_string)
            .collect(),
        Value::String(s) => {
            let stripped = s.trim();
            if stripped.is_empty() {
                return Vec::new();
            }
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(stripped) {
                return items
                    .iter()
                    .filter(|item| !item.is_null())
                    .map(item_to_string)
                    .collect();
            }
            // Loose bracket syntax that is not valid JSON, e.g. `[a, b]`.
            if stripped.starts_with('[') && stripped.ends_with(']') {
                let inner = stripped[1..stripped.len() - 1].trim();
                if inner.is_empty() {
                    return Vec::new();
                }
                return inner
                    .split(',')
                    .map(|part| part.trim().trim_matches(&['"', '\''][..]).to_string())
                    .filter(|part| !part.is_empty())
                    .collect();
            }
            vec![stripped.to_string()]
        }
        other => vec![item_to_string(other)],
    }
}

fn item_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a number-or-string JSON value into a `Decimal`.
pub fn to_decimal(value: Option<&Value>) -> Option<Decimal> {
    match value? {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse().ok()
        }
        _ => None,
    }
}

/// Parse a boolean that may arrive as a bool, a string, or a 0/1 number.
pub fn to_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

/// Parse an upstream timestamp into a UTC instant.
///
/// Accepts RFC3339 strings, all-digit strings (interpreted as millisecond
/// epoch, matching the websocket message format), and numeric epoch seconds.
pub fn parse_datetime(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => parse_datetime_str(s),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Utc.timestamp_opt(i, 0).single();
            }
            n.as_f64()
                .and_then(|f| Utc.timestamp_millis_opt((f * 1000.0) as i64).single())
        }
        _ => None,
    }
}

/// Parse a timestamp string: RFC3339 or millisecond-epoch digits.
pub fn parse_datetime_str(s: &str) -> Option<DateTime<Utc>> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return trimmed
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Lowercased, trimmed string form of a JSON value; empty for null/absent.
pub fn safe_lower(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_lowercase(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string().trim().to_lowercase(),
    }
}

/// Non-empty string form of a JSON value.
pub fn to_string_opt(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_jsonish_array_actual_array() {
        let value = json!(["token1", "token2"]);
        assert_eq!(
            parse_jsonish_array(Some(&value)),
            vec!["token1".to_string(), "token2".to_string()]
        );
    }

    #[test]
    fn test_parse_jsonish_array_encoded_string() {
        let value = json!("[\"token1\", \"token2\"]");
        assert_eq!(
            parse_jsonish_array(Some(&value)),
            vec!["token1".to_string(), "token2".to_string()]
        );
    }

    #[test]
    fn test_parse_jsonish_array_loose_brackets() {
        let value = json!("[Yes, No]");
        assert_eq!(
            parse_jsonish_array(Some(&value)),
            vec!["Yes".to_string(), "No".to_string()]
        );
    }

    #[test]
    fn test_parse_jsonish_array_empty() {
        assert!(parse_jsonish_array(None).is_empty());
        assert!(parse_jsonish_array(Some(&json!(""))).is_empty());
        assert!(parse_jsonish_array(Some(&json!("[]"))).is_empty());
    }

    #[test]
    fn test_to_decimal_number_and_string() {
        assert_eq!(to_decimal(Some(&json!("0.45"))), Some(dec!(0.45)));
        assert_eq!(to_decimal(Some(&json!(123.5))), Some(dec!(123.5)));
        assert_eq!(to_decimal(Some(&json!(100))), Some(dec!(100)));
        assert_eq!(to_decimal(Some(&json!("not-a-number"))), None);
        assert_eq!(to_decimal(Some(&json!(null))), None);
        assert_eq!(to_decimal(None), None);
    }

    #[test]
    fn test_to_bool_variants() {
        assert_eq!(to_bool(Some(&json!(true))), Some(true));
        assert_eq!(to_bool(Some(&json!("false"))), Some(false));
        assert_eq!(to_bool(Some(&json!("TRUE"))), Some(true));
        assert_eq!(to_bool(Some(&json!(1))), Some(true));
        assert_eq!(to_bool(Some(&json!(0))), Some(false));
        assert_eq!(to_bool(Some(&json!("maybe"))), None);
    }

    #[test]
    fn test_parse_datetime_rfc3339() {
        let dt = parse_datetime_str("2025-01-01T12:00:00Z").unwrap();
        assert_eq!(dt.timestamp(), 1735732800);
    }

    #[test]
    fn test_parse_datetime_millis_string() {
        let dt = parse_datetime_str("1704067200000").unwrap();
        assert_eq!(dt.timestamp_millis(), 1704067200000);
    }

    #[test]
    fn test_parse_datetime_epoch_number() {
        let dt = parse_datetime(Some(&json!(1704067200))).unwrap();
        assert_eq!(dt.timestamp(), 1704067200);
    }

    #[test]
    fn test_parse_datetime_rejects_garbage() {
        assert!(parse_datetime_str("soon").is_none());
        assert!(parse_datetime_str("").is_none());
    }

    #[test]
    fn test_safe_lower() {
        assert_eq!(safe_lower(Some(&json!("  Yes "))), "yes");
        assert_eq!(safe_lower(None), "");
    }
}
