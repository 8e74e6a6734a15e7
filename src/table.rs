//! Generic table schema + CRUD: DDL assembly, row encode/decode, and the
//! select/insert/update/delete operations every domain table is built from.

use std::collections::{BTreeMap, HashMap, HashSet};

use sqlite::{Connection, State, Statement};

use crate::column::Column;
use crate::error::{Error, Result};
use crate::query::query_to_sql;
use crate::selector::{selector_to_sql, Selector};
use crate::types::{Entry, EntryValue, Value};

/// A declarative table: its column set plus the primary-key column names,
/// in the order given to `PRIMARY KEY (...)`.
#[derive(Clone)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub exists_ignore: bool,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Table {
            name: name.into(),
            columns,
            exists_ignore: true,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn key_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.key).collect()
    }

    /// `create table [if not exists] <name> (<columns>, primary key (<keys>))`
    pub fn create_statement(&self) -> String {
        self.create_statement_in(None)
    }

    /// As [`Table::create_statement`], but qualifying the table name with
    /// `schema.` — used by the migration engine to build a fresh schema
    /// inside an attached `db_new` database.
    pub fn create_statement_in(&self, schema: Option<&str>) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(Column::create_statement).collect();
        let keys: Vec<&str> = self.key_columns().iter().map(|c| c.name.as_str()).collect();
        parts.push(format!("primary key ({})", keys.join(", ")));

        let exists_clause = if self.exists_ignore {
            "if not exists "
        } else {
            ""
        };
        let qualified_name = match schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.clone(),
        };
        format!(
            "create table {exists_clause}{qualified_name} ({})",
            parts.join(",\n  ")
        )
    }

    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute(self.create_statement())?;
        Ok(())
    }

    pub fn create_in(&self, conn: &Connection, schema: &str) -> Result<()> {
        conn.execute(self.create_statement_in(Some(schema)))?;
        Ok(())
    }

    /// Introspect columns from the connection via `PRAGMA table_info`,
    /// used when no schema is preloaded (e.g. migration steps inspecting an
    /// older on-disk layout).
    pub fn introspect(conn: &Connection, name: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut statement = conn.prepare(format!("PRAGMA table_info({name})"))?;
        while let State::Row = statement.next()? {
            let column_name: String = statement.read(1)?;
            names.push(column_name);
        }
        Ok(names)
    }

    /// Accept a case-insensitive mapping, strip leading underscores from
    /// keys, fill declared defaults when `defaults` is set, drop unknown
    /// keys, then apply each column's `to_entry` to build the on-disk row.
    pub fn format_entry(&self, entry: &Entry, defaults: bool) -> Result<BTreeMap<String, Value>> {
        let normalised: BTreeMap<String, EntryValue> = entry
            .iter()
            .map(|(k, v)| (k.trim_start_matches('_').to_ascii_uppercase(), v.clone()))
            .collect();

        let mut row = BTreeMap::new();
        for column in &self.columns {
            let decoded = match normalised.get(&column.name) {
                Some(value) => value.clone(),
                None if defaults => match &column.default {
                    crate::column::Default::Value(v) => v.clone(),
                    crate::column::Default::None => {
                        if column.not_null {
                            return Err(Error::Schema(format!(
                                "missing value for required column {}",
                                column.name
                            )));
                        }
                        EntryValue::Null
                    }
                },
                None => continue,
            };
            row.insert(column.name.clone(), column.to_entry(&decoded)?);
        }
        Ok(row)
    }

    fn decode_row(&self, statement: &Statement) -> Result<Entry> {
        let mut entry = Entry::new();
        for (index, column) in self.columns.iter().enumerate() {
            let cell = read_cell(statement, index, column)?;
            entry.insert(column.name.clone(), column.from_entry(&cell)?);
        }
        Ok(entry)
    }

    pub fn len(&self, conn: &Connection) -> Result<i64> {
        let mut statement = conn.prepare(format!("select count(*) from {}", self.name))?;
        statement.next()?;
        Ok(statement.read::<i64, _>(0)?)
    }

    /// Fetch by the table's single primary-key column. Errors if the table
    /// is keyed by more than one column — use [`Table::get_by_map`] there.
    pub fn get(&self, conn: &Connection, key: &Value) -> Result<Option<Entry>> {
        let key_column = self.single_key_column()?;
        let sql = format!("select * from {} where {} = ?", self.name, key_column.name);
        let mut statement = conn.prepare(sql)?;
        bind_value(&mut statement, 1, key)?;
        if let State::Row = statement.next()? {
            Ok(Some(self.decode_row(&statement)?))
        } else {
            Ok(None)
        }
    }

    /// Select by equality across every field of `fields` (AND-ed).
    pub fn get_by_map(&self, conn: &Connection, fields: &Entry) -> Result<Vec<Entry>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut wheres = Vec::new();
        let mut values = Vec::new();
        for (name, value) in fields {
            let Some(column) = self.column(name) else {
                continue;
            };
            wheres.push(format!("{} = ?", column.name));
            values.push(column.to_entry(value)?);
        }
        let sql = format!("select * from {} where {}", self.name, wheres.join(" and "));
        let mut statement = conn.prepare(sql)?;
        for (i, v) in values.iter().enumerate() {
            bind_value(&mut statement, i + 1, v)?;
        }
        self.collect(statement)
    }

    /// Select the OR of the primary key over a list of scalar keys.
    pub fn get_by_keys(&self, conn: &Connection, keys: &[Value]) -> Result<Vec<Entry>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let key_column = self.single_key_column()?;
        let placeholders = vec!["?"; keys.len()].join(",");
        let sql = format!(
            "select * from {} where {} in ({placeholders})",
            self.name, key_column.name
        );
        let mut statement = conn.prepare(sql)?;
        for (i, key) in keys.iter().enumerate() {
            bind_value(&mut statement, i + 1, key)?;
        }
        self.collect(statement)
    }

    /// Insert-or-replace, overriding the primary key with `key`.
    pub fn set(&self, conn: &Connection, key: &Value, entry: &Entry) -> Result<()> {
        let key_column = self.single_key_column()?.name.clone();
        let mut entry = entry.clone();
        crate::types::entry_insert(&mut entry, &key_column, column_value_to_entry(key));
        self.insert(conn, &entry, InsertMode::Replace)
    }

    pub fn delete(&self, conn: &Connection, key: &Value) -> Result<usize> {
        let key_column = self.single_key_column()?;
        let sql = format!("delete from {} where {} = ?", self.name, key_column.name);
        let mut statement = conn.prepare(sql)?;
        bind_value(&mut statement, 1, key)?;
        statement.next()?;
        Ok(conn.change_count())
    }

    pub fn delete_by_map(&self, conn: &Connection, fields: &Entry) -> Result<usize> {
        let mut wheres = Vec::new();
        let mut values = Vec::new();
        for (name, value) in fields {
            let Some(column) = self.column(name) else {
                continue;
            };
            wheres.push(format!("{} = ?", column.name));
            values.push(column.to_entry(value)?);
        }
        if wheres.is_empty() {
            return Ok(0);
        }
        let sql = format!("delete from {} where {}", self.name, wheres.join(" and "));
        let mut statement = conn.prepare(sql)?;
        for (i, v) in values.iter().enumerate() {
            bind_value(&mut statement, i + 1, v)?;
        }
        statement.next()?;
        Ok(conn.change_count())
    }

    pub fn iter(&self, conn: &Connection) -> Result<Vec<Entry>> {
        let statement = conn.prepare(format!("select * from {}", self.name))?;
        self.collect(statement)
    }

    pub fn insert(&self, conn: &Connection, entry: &Entry, mode: InsertMode) -> Result<()> {
        let row = self.format_entry(entry, true)?;
        let verb = match mode {
            InsertMode::Insert => "insert into",
            InsertMode::Replace => "insert or replace into",
            InsertMode::IgnoreExisting => "insert or ignore into",
        };
        let names: Vec<&str> = row.keys().map(String::as_str).collect();
        let placeholders = vec!["?"; names.len()].join(",");
        let sql = format!(
            "{verb} {} ({}) values ({placeholders})",
            self.name,
            names.join(",")
        );
        let mut statement = conn.prepare(sql)?;
        for (i, value) in row.values().enumerate() {
            bind_value(&mut statement, i + 1, value)?;
        }
        statement.next()?;
        Ok(())
    }

    pub fn select(
        &self,
        conn: &Connection,
        selector: Option<&Selector>,
        order: &[&str],
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Entry>> {
        let mut sql = format!("select * from {}", self.name);
        let mut values = Vec::new();
        if let Some(selector) = selector {
            let (fragment, bound) = selector_to_sql(selector)?;
            sql.push_str(" where ");
            sql.push_str(&fragment);
            values = bound;
        }
        if !order.is_empty() {
            sql.push_str(" order by ");
            sql.push_str(&order.join(","));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" limit {limit}"));
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" offset {offset}"));
        }
        let mut statement = conn.prepare(sql)?;
        for (i, value) in values.iter().enumerate() {
            bind_value(&mut statement, i + 1, value)?;
        }
        self.collect(statement)
    }

    /// As [`Table::select`], but the filter comes from the free-form query
    /// language (§4.4) instead of a [`Selector`] tree: parses `query` via
    /// [`query_to_sql`] and splices its tokens straight into the `where`
    /// clause before binding the parsed values in order.
    #[allow(clippy::too_many_arguments)]
    pub fn select_query(
        &self,
        conn: &Connection,
        query: &str,
        default_field: &str,
        likes: &HashSet<String>,
        aliases: &HashMap<String, String>,
        order: &[&str],
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Entry>> {
        let parsed = query_to_sql(query, default_field, likes, aliases);

        let mut sql = format!("select * from {}", self.name);
        if !parsed.tokens.is_empty() {
            sql.push_str(" where ");
            sql.push_str(&parsed.tokens.join(" "));
        }
        if !order.is_empty() {
            sql.push_str(" order by ");
            sql.push_str(&order.join(","));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" limit {limit}"));
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" offset {offset}"));
        }
        let mut statement = conn.prepare(sql)?;
        for (i, value) in parsed.values.iter().enumerate() {
            statement.bind((i + 1, value.as_str()))?;
        }
        self.collect(statement)
    }

    pub fn update(&self, conn: &Connection, selector: &Selector, new_entry: &Entry) -> Result<usize> {
        let row = self.format_entry(new_entry, false)?;
        if row.is_empty() {
            return Ok(0);
        }
        let assignments: Vec<String> = row.keys().map(|name| format!("{name} = ?")).collect();
        let (fragment, where_values) = selector_to_sql(selector)?;
        let sql = format!(
            "update {} set {} where {}",
            self.name,
            assignments.join(", "),
            fragment
        );
        let mut statement = conn.prepare(sql)?;
        let mut index = 1;
        for value in row.values() {
            bind_value(&mut statement, index, value)?;
            index += 1;
        }
        for value in &where_values {
            bind_value(&mut statement, index, value)?;
            index += 1;
        }
        statement.next()?;
        Ok(conn.change_count())
    }

    /// Read `column` off `key`'s row, add the missing values from `values`
    /// (preserving existing order, appending new ones), write back only if
    /// the set actually changed, and report whether it did.
    pub fn add_to_list(
        &self,
        conn: &Connection,
        key: &Value,
        column: &str,
        values: &[String],
    ) -> Result<bool> {
        let Some(entry) = self.get(conn, key)? else {
            return Err(Error::Key(format!("no row for key {key}")));
        };
        let current = crate::types::entry_get(&entry, column)
            .and_then(EntryValue::as_list)
            .unwrap_or(&[])
            .to_vec();
        let mut updated = current.clone();
        let mut changed = false;
        for v in values {
            if !updated.contains(v) {
                updated.push(v.clone());
                changed = true;
            }
        }
        if !changed {
            return Ok(false);
        }
        self.write_list(conn, key, column, &entry, updated)?;
        Ok(true)
    }

    /// Remove `values` from `column`, preserving the relative order of
    /// retained items. Returns `false` without writing if nothing changed.
    pub fn remove_from_list(
        &self,
        conn: &Connection,
        key: &Value,
        column: &str,
        values: &[String],
    ) -> Result<bool> {
        let Some(entry) = self.get(conn, key)? else {
            return Err(Error::Key(format!("no row for key {key}")));
        };
        let current = crate::types::entry_get(&entry, column)
            .and_then(EntryValue::as_list)
            .unwrap_or(&[])
            .to_vec();
        let updated: Vec<String> = current
            .iter()
            .filter(|v| !values.contains(v))
            .cloned()
            .collect();
        if updated.len() == current.len() {
            return Ok(false);
        }
        self.write_list(conn, key, column, &entry, updated)?;
        Ok(true)
    }

    fn write_list(
        &self,
        conn: &Connection,
        key: &Value,
        column: &str,
        entry: &Entry,
        updated: Vec<String>,
    ) -> Result<()> {
        let is_set = matches!(
            self.column(column).map(|c| &c.kind),
            Some(crate::codec::ColumnKind::SetOf)
        );
        let new_value = if is_set {
            EntryValue::Set(updated)
        } else {
            EntryValue::List(updated)
        };
        let key_column = self.single_key_column()?;
        let mut new_entry = entry.clone();
        crate::types::entry_insert(&mut new_entry, column, new_value);
        self.update(
            conn,
            &Selector::Eq(key_column.name.clone(), key.clone()),
            &new_entry,
        )?;
        Ok(())
    }

    fn single_key_column(&self) -> Result<&Column> {
        let keys = self.key_columns();
        match keys.as_slice() {
            [one] => Ok(one),
            _ => Err(Error::Schema(format!(
                "table {} does not have a single-column primary key",
                self.name
            ))),
        }
    }

    fn collect(&self, mut statement: Statement) -> Result<Vec<Entry>> {
        let mut rows = Vec::new();
        while let State::Row = statement.next()? {
            rows.push(self.decode_row(&statement)?);
        }
        Ok(rows)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    Insert,
    Replace,
    IgnoreExisting,
}

fn column_value_to_entry(value: &Value) -> EntryValue {
    match value {
        Value::Null => EntryValue::Null,
        Value::Int(i) => EntryValue::Int(*i),
        Value::Real(r) => EntryValue::Real(*r),
        Value::Text(s) => EntryValue::Text(s.clone()),
    }
}

fn read_cell(statement: &Statement, index: usize, column: &Column) -> Result<Value> {
    use crate::codec::ColumnKind;
    Ok(match column.kind {
        ColumnKind::Int | ColumnKind::Bool => match statement.read::<Option<i64>, _>(index)? {
            Some(i) => Value::Int(i),
            None => Value::Null,
        },
        ColumnKind::Real => match statement.read::<Option<f64>, _>(index)? {
            Some(r) => Value::Real(r),
            None => Value::Null,
        },
        _ => match statement.read::<Option<String>, _>(index)? {
            Some(s) => Value::Text(s),
            None => Value::Null,
        },
    })
}

fn bind_value(statement: &mut Statement, index: usize, value: &Value) -> Result<()> {
    match value {
        Value::Null => statement.bind((index, ()))?,
        Value::Int(i) => statement.bind((index, *i))?,
        Value::Real(r) => statement.bind((index, *r))?,
        Value::Text(s) => statement.bind((index, s.as_str()))?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ColumnKind;

    fn users_table() -> Table {
        Table::new(
            "USERS",
            vec![
                Column::new("USERNAME", ColumnKind::Text).key(true),
                Column::new("ACTIVE", ColumnKind::Bool).default(EntryValue::Bool(true)),
            ],
        )
    }

    #[test]
    fn create_statement_includes_primary_key() {
        let table = users_table();
        let sql = table.create_statement();
        assert!(sql.contains("primary key (USERNAME)"));
    }

    #[test]
    fn format_entry_fills_defaults_and_drops_unknown_keys() {
        let table = users_table();
        let mut entry = Entry::new();
        entry.insert("USERNAME".into(), EntryValue::Text("alice".into()));
        entry.insert("BOGUS".into(), EntryValue::Text("x".into()));
        let row = table.format_entry(&entry, true).unwrap();
        assert_eq!(row.get("USERNAME"), Some(&Value::Text("alice".into())));
        assert_eq!(row.get("ACTIVE"), Some(&Value::Int(1)));
        assert!(!row.contains_key("BOGUS"));
    }

    #[test]
    fn format_entry_errors_without_default_for_required_column() {
        let table = Table::new(
            "T",
            vec![Column::new("ID", ColumnKind::Int).key(true).not_null(true)],
        );
        let entry = Entry::new();
        assert!(table.format_entry(&entry, true).is_err());
    }

    #[test]
    fn select_query_filters_by_default_field() {
        let conn = sqlite::open(":memory:").unwrap();
        let table = users_table();
        table.create(&conn).unwrap();

        let mut alice = Entry::new();
        alice.insert("USERNAME".into(), EntryValue::Text("alice".into()));
        table.insert(&conn, &alice, InsertMode::Insert).unwrap();

        let mut bob = Entry::new();
        bob.insert("USERNAME".into(), EntryValue::Text("bob".into()));
        table.insert(&conn, &bob, InsertMode::Insert).unwrap();

        let rows = table
            .select_query(&conn, "alice", "USERNAME", &HashSet::new(), &HashMap::new(), &[], None, None)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].get("USERNAME"),
            Some(&EntryValue::Text("alice".into()))
        );
    }
}
