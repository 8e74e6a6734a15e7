//! Per-column encode/decode between in-memory [`EntryValue`]s and the single
//! on-disk textual/integer cell the embedded relational engine stores.

use crate::error::{Error, Result};
use crate::types::{EntryValue, Value};

/// Precision of a DATE/DATETIME column, fixing one of the three exact
/// encodings named in the data model (DATE-only, seconds, microseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimePrecision {
    /// `YYYY-MM-DD`
    Date,
    /// `YYYY-MM-DDTHH:MM:SS`
    Seconds,
    /// `YYYY-MM-DDTHH:MM:SS.ffffff`
    Micros,
}

impl DateTimePrecision {
    pub fn format(self) -> &'static str {
        match self {
            DateTimePrecision::Date => "%Y-%m-%d",
            DateTimePrecision::Seconds => "%Y-%m-%dT%H:%M:%S",
            DateTimePrecision::Micros => "%Y-%m-%dT%H:%M:%S%.6f",
        }
    }
}

/// Closed tagged variant of every declared column type the codec knows how
/// to move between disk and memory. An unrecognised kind is never
/// constructed — `Custom` covers everything the enumerated kinds don't.
#[derive(Clone)]
pub enum ColumnKind {
    Int,
    Real,
    Bool,
    Text,
    DateTime(DateTimePrecision),
    ListOf,
    SetOf,
    Json,
    Custom {
        sql_type: &'static str,
        to_entry: fn(&EntryValue) -> Value,
        from_entry: fn(&Value) -> EntryValue,
    },
}

impl ColumnKind {
    /// The SQL type used in `CREATE TABLE`, unless a column overrides it.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Int => "integer",
            ColumnKind::Real => "real",
            ColumnKind::Bool => "boolean",
            ColumnKind::Text => "text",
            ColumnKind::DateTime(precision) => match precision {
                DateTimePrecision::Date => "date",
                _ => "datetime",
            },
            ColumnKind::ListOf | ColumnKind::SetOf | ColumnKind::Json => "text",
            ColumnKind::Custom { sql_type, .. } => sql_type,
        }
    }

    /// Encode a decoded value into the on-disk cell.
    pub fn to_entry(&self, value: &EntryValue) -> Result<Value> {
        Ok(match self {
            ColumnKind::Custom { to_entry, .. } => to_entry(value),
            ColumnKind::Int => Value::Int(value.as_int().ok_or_else(|| {
                Error::Schema(format!("expected integer value, got {value:?}"))
            })?),
            ColumnKind::Bool => Value::Int(if value.as_bool().unwrap_or(false) { 1 } else { 0 }),
            ColumnKind::Real => match value {
                EntryValue::Real(r) => Value::Real(*r),
                EntryValue::Int(i) => Value::Real(*i as f64),
                other => return Err(Error::Schema(format!("expected real value, got {other:?}"))),
            },
            ColumnKind::Text => Value::Text(
                value
                    .as_text()
                    .map(str::to_string)
                    .unwrap_or_else(|| value_as_string(value)),
            ),
            ColumnKind::DateTime(_) => Value::Text(
                value
                    .as_text()
                    .map(str::to_string)
                    .ok_or_else(|| Error::Schema(format!("expected datetime text, got {value:?}")))?,
            ),
            ColumnKind::ListOf => Value::Text(format_list(
                value.as_list().ok_or_else(|| {
                    Error::Schema(format!("expected list/set value, got {value:?}"))
                })?,
                false,
            )),
            ColumnKind::SetOf => Value::Text(format_list(
                value.as_list().ok_or_else(|| {
                    Error::Schema(format!("expected list/set value, got {value:?}"))
                })?,
                true,
            )),
            ColumnKind::Json => match value {
                EntryValue::Json(j) => Value::Text(serde_json::to_string(j).map_err(|e| {
                    Error::Schema(format!("failed to encode json: {e}"))
                })?),
                other => return Err(Error::Schema(format!("expected json value, got {other:?}"))),
            },
        })
    }

    /// Decode the on-disk cell back into a typed value.
    pub fn from_entry(&self, value: &Value) -> Result<EntryValue> {
        Ok(match self {
            ColumnKind::Custom { from_entry, .. } => from_entry(value),
            ColumnKind::Int => EntryValue::Int(value.as_int().unwrap_or(0)),
            ColumnKind::Bool => EntryValue::Bool(value.as_int().unwrap_or(0) != 0),
            ColumnKind::Real => EntryValue::Real(match value {
                Value::Real(r) => *r,
                Value::Int(i) => *i as f64,
                _ => 0.0,
            }),
            ColumnKind::Text => EntryValue::Text(value.as_text().unwrap_or_default().to_string()),
            ColumnKind::DateTime(_) => {
                EntryValue::DateTime(value.as_text().unwrap_or_default().to_string())
            }
            ColumnKind::ListOf => EntryValue::List(parse_list(value.as_text().unwrap_or_default())),
            ColumnKind::SetOf => EntryValue::Set(parse_list(value.as_text().unwrap_or_default())),
            ColumnKind::Json => {
                let text = value.as_text().unwrap_or("null");
                EntryValue::Json(serde_json::from_str(text).unwrap_or(serde_json::Value::Null))
            }
        })
    }
}

fn value_as_string(value: &EntryValue) -> String {
    match value {
        EntryValue::Null => String::new(),
        EntryValue::Int(i) => i.to_string(),
        EntryValue::Real(r) => r.to_string(),
        EntryValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        EntryValue::Text(s) | EntryValue::DateTime(s) => s.clone(),
        EntryValue::List(v) | EntryValue::Set(v) => format_list(v, false),
        EntryValue::Json(j) => j.to_string(),
    }
}

/// `|e1||e2||…||en|` — each element flanked by pipes, empty list encodes to
/// an empty string. When `sort` is set, elements are sorted ascending,
/// case-insensitively (used for `set[T]` columns).
pub fn format_list(elements: &[String], sort: bool) -> String {
    let mut elements = elements.to_vec();
    if sort {
        elements.sort_by_key(|e| e.to_ascii_lowercase());
    }
    elements
        .iter()
        .map(|e| format!("|{e}|"))
        .collect::<Vec<_>>()
        .join("")
}

/// Inverse of [`format_list`]: strip one leading/trailing `|`, split on
/// `||`, drop empty elements.
pub fn parse_list(encoded: &str) -> Vec<String> {
    let without_leading = encoded.strip_prefix('|').unwrap_or(encoded);
    let trimmed = without_leading
        .strip_suffix('|')
        .unwrap_or(without_leading);
    trimmed
        .split("||")
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_round_trips() {
        let xs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(parse_list(&format_list(&xs, false)), xs);
    }

    #[test]
    fn empty_list_encodes_to_empty_string() {
        assert_eq!(format_list(&[], false), "");
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn canonical_string_is_fixed_point() {
        let s = "|a||b||c|";
        assert_eq!(format_list(&parse_list(s), false), s);
    }

    #[test]
    fn set_sorts_ascending_case_insensitive() {
        let xs = vec!["Bob".to_string(), "alice".to_string(), "Carl".to_string()];
        assert_eq!(format_list(&xs, true), "|alice||Bob||Carl|");
    }

    #[test]
    fn datetime_kind_round_trips_through_declared_format() {
        let kind = ColumnKind::DateTime(DateTimePrecision::Date);
        let value = kind
            .to_entry(&EntryValue::DateTime("2024-01-02".into()))
            .unwrap();
        assert_eq!(value, Value::Text("2024-01-02".into()));
        assert_eq!(
            kind.from_entry(&value).unwrap(),
            EntryValue::DateTime("2024-01-02".into())
        );
    }
}
