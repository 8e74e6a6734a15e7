use std::collections::BTreeMap;
use std::fmt;

/// A single on-disk cell, exactly what the embedded relational engine
/// stores or returns. This is the Codec's unit of exchange with `sqlite`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Int(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(if b { 1 } else { 0 })
    }
}

/// A decoded, owned in-memory representation of a cell — the codec's
/// output type. Returned entries are owning copies with no back-reference
/// to the store; list-mutation helpers read a copy, compute a delta and
/// write back separately (last-writer-wins is acceptable and documented).
#[derive(Debug, Clone, PartialEq)]
pub enum EntryValue {
    Null,
    Int(i64),
    Real(f64),
    Bool(bool),
    Text(String),
    DateTime(String),
    List(Vec<String>),
    Set(Vec<String>),
    Json(serde_json::Value),
}

impl EntryValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EntryValue::Text(s) | EntryValue::DateTime(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            EntryValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EntryValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            EntryValue::List(v) | EntryValue::Set(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, EntryValue::Null)
    }
}

impl From<&str> for EntryValue {
    fn from(s: &str) -> Self {
        EntryValue::Text(s.to_string())
    }
}

impl From<String> for EntryValue {
    fn from(s: String) -> Self {
        EntryValue::Text(s)
    }
}

impl From<i64> for EntryValue {
    fn from(i: i64) -> Self {
        EntryValue::Int(i)
    }
}

impl From<bool> for EntryValue {
    fn from(b: bool) -> Self {
        EntryValue::Bool(b)
    }
}

/// On-disk-ready row: column name to the single textual/integer cell the
/// embedded relational engine actually stores, post-codec.
pub type Row = BTreeMap<String, Value>;

/// Case-insensitive mapping from column name to decoded value: a short-lived
/// snapshot of one row. Keys are stored upper-cased to match the store's
/// convention of upper-case column names.
pub type Entry = BTreeMap<String, EntryValue>;

pub fn entry_get<'a>(entry: &'a Entry, key: &str) -> Option<&'a EntryValue> {
    entry.get(&key.to_ascii_uppercase())
}

pub fn entry_insert(entry: &mut Entry, key: &str, value: EntryValue) {
    entry.insert(key.to_ascii_uppercase(), value);
}
