//! Declarative column schema: name, storage kind, constraints and default.

use crate::codec::ColumnKind;
use crate::error::Result;
use crate::types::{EntryValue, Value};

/// A default value for a column, distinct from "no default" (`None`).
#[derive(Clone)]
pub enum Default {
    None,
    Value(EntryValue),
}

/// One declared column: name, kind, SQL type override, constraints, and
/// an optional default distinct from "no default".
#[derive(Clone)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    sql_type_override: Option<&'static str>,
    pub not_null: bool,
    pub unique: bool,
    pub key: bool,
    check: Option<String>,
    pub default: Default,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Column {
            name: name.into(),
            kind,
            sql_type_override: None,
            not_null: true,
            unique: false,
            key: false,
            check: None,
            default: Default::None,
        }
    }

    pub fn not_null(mut self, value: bool) -> Self {
        self.not_null = value;
        self
    }

    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    pub fn key(mut self, value: bool) -> Self {
        self.key = value;
        self
    }

    pub fn sql_type(mut self, sql_type: &'static str) -> Self {
        self.sql_type_override = Some(sql_type);
        self
    }

    /// `check` is a template with `{name}` substituted for the column name,
    /// e.g. `"{name} > 0"`.
    pub fn check(mut self, template: impl Into<String>) -> Self {
        self.check = Some(template.into());
        self
    }

    pub fn default(mut self, value: EntryValue) -> Self {
        self.default = Default::Value(value);
        self
    }

    pub fn resolved_sql_type(&self) -> &str {
        self.sql_type_override.unwrap_or_else(|| self.kind.sql_type())
    }

    pub fn check_expr(&self) -> Option<String> {
        self.check
            .as_ref()
            .map(|template| template.replace("{name}", &self.name))
    }

    /// `name type [unique] [not null] [check (…)]`
    pub fn create_statement(&self) -> String {
        let mut parts = vec![self.name.clone(), self.resolved_sql_type().to_string()];
        if self.unique {
            parts.push("unique".to_string());
        }
        if self.not_null {
            parts.push("not null".to_string());
        }
        if let Some(check) = self.check_expr() {
            parts.push(format!("check ({check})"));
        }
        parts.join(" ")
    }

    pub fn to_entry(&self, value: &EntryValue) -> Result<Value> {
        self.kind.to_entry(value)
    }

    pub fn from_entry(&self, value: &Value) -> Result<EntryValue> {
        self.kind.from_entry(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_statement_renders_constraints() {
        let column = Column::new("ID", ColumnKind::Int)
            .key(true)
            .check("{name} > 0");
        assert_eq!(column.create_statement(), "ID integer not null check (ID > 0)");
    }

    #[test]
    fn unique_renders_before_not_null() {
        let column = Column::new("USERNAME", ColumnKind::Text).unique(true);
        assert_eq!(column.create_statement(), "USERNAME text unique not null");
    }
}
