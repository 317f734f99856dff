//! Database value representation
//!
//! `DbValue` is the dynamic value type carried by record members and bound as
//! query parameters. It round-trips through `serde_json::Value` for
//! serialization and the graph walker.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A single database value
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Json(JsonValue),
}

impl DbValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }

    /// "Empty" in the active-record sense: null, empty string, or zero id
    pub fn is_empty(&self) -> bool {
        match self {
            DbValue::Null => true,
            DbValue::Text(s) => s.is_empty(),
            DbValue::Int(i) => *i == 0,
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DbValue::Int(i) => Some(*i),
            DbValue::Float(f) => Some(*f as i64),
            DbValue::Text(s) => s.parse().ok(),
            DbValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DbValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DbValue::Bool(b) => Some(*b),
            DbValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            DbValue::Timestamp(ts) => Some(*ts),
            DbValue::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// Render as a SQL literal for statements that cannot be parameterized
    /// (schema defaults, generated DDL).
    pub fn to_sql_literal(&self) -> String {
        match self {
            DbValue::Null => "NULL".to_string(),
            DbValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            DbValue::Int(i) => i.to_string(),
            DbValue::Float(f) => f.to_string(),
            DbValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            DbValue::Bytes(b) => format!("'\\x{}'", hex_encode(b)),
            DbValue::Uuid(u) => format!("'{}'", u),
            DbValue::Timestamp(ts) => format!("'{}'", ts.to_rfc3339()),
            DbValue::Json(j) => format!("'{}'", j.to_string().replace('\'', "''")),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            DbValue::Null => JsonValue::Null,
            DbValue::Bool(b) => JsonValue::Bool(*b),
            DbValue::Int(i) => JsonValue::Number((*i).into()),
            DbValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DbValue::Text(s) => JsonValue::String(s.clone()),
            DbValue::Bytes(b) => JsonValue::String(hex_encode(b)),
            DbValue::Uuid(u) => JsonValue::String(u.to_string()),
            DbValue::Timestamp(ts) => JsonValue::String(ts.to_rfc3339()),
            DbValue::Json(j) => j.clone(),
        }
    }

    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => DbValue::Null,
            JsonValue::Bool(b) => DbValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DbValue::Int(i)
                } else {
                    DbValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => DbValue::Text(s),
            other @ (JsonValue::Array(_) | JsonValue::Object(_)) => DbValue::Json(other),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

impl From<bool> for DbValue {
    fn from(value: bool) -> Self {
        DbValue::Bool(value)
    }
}

impl From<i32> for DbValue {
    fn from(value: i32) -> Self {
        DbValue::Int(value as i64)
    }
}

impl From<i64> for DbValue {
    fn from(value: i64) -> Self {
        DbValue::Int(value)
    }
}

impl From<f64> for DbValue {
    fn from(value: f64) -> Self {
        DbValue::Float(value)
    }
}

impl From<&str> for DbValue {
    fn from(value: &str) -> Self {
        DbValue::Text(value.to_string())
    }
}

impl From<String> for DbValue {
    fn from(value: String) -> Self {
        DbValue::Text(value)
    }
}

impl From<Uuid> for DbValue {
    fn from(value: Uuid) -> Self {
        DbValue::Uuid(value)
    }
}

impl From<DateTime<Utc>> for DbValue {
    fn from(value: DateTime<Utc>) -> Self {
        DbValue::Timestamp(value)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DbValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_detection() {
        assert!(DbValue::Null.is_empty());
        assert!(DbValue::Text(String::new()).is_empty());
        assert!(DbValue::Int(0).is_empty());
        assert!(!DbValue::Int(7).is_empty());
        assert!(!DbValue::Bool(false).is_empty());
    }

    #[test]
    fn json_round_trip() {
        let v = DbValue::Int(42);
        assert_eq!(DbValue::from_json(v.to_json()), v);
        let v = DbValue::Text("hello".to_string());
        assert_eq!(DbValue::from_json(v.to_json()), v);
    }

    #[test]
    fn sql_literal_escapes_quotes() {
        assert_eq!(
            DbValue::Text("it's".to_string()).to_sql_literal(),
            "'it''s'"
        );
    }
}
