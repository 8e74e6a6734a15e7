use std::collections::{HashMap, HashSet};

use sqlite::Connection;

use crate::codec::{ColumnKind, DateTimePrecision};
use crate::column::Column;
use crate::error::{Error, Result};
use crate::selector::Selector;
use crate::table::{InsertMode, Table};
use crate::tables::normalize_username;
use crate::types::{entry_get, entry_insert, Entry, EntryValue, Value};

pub struct JournalsTable {
    table: Table,
}

impl JournalsTable {
    pub fn new() -> Self {
        let columns = vec![
            Column::new("ID", ColumnKind::Int).key(true).check("{name} > 0"),
            Column::new("AUTHOR", ColumnKind::Text).check("length({name}) >= 1"),
            Column::new("TITLE", ColumnKind::Text)
                .not_null(false)
                .default(EntryValue::Text(String::new())),
            Column::new("DATE", ColumnKind::DateTime(DateTimePrecision::Seconds)),
            Column::new("CONTENT", ColumnKind::Text)
                .not_null(false)
                .default(EntryValue::Text(String::new())),
            Column::new("HEADER", ColumnKind::Text)
                .not_null(false)
                .default(EntryValue::Text(String::new())),
            Column::new("FOOTER", ColumnKind::Text)
                .not_null(false)
                .default(EntryValue::Text(String::new())),
            Column::new("MENTIONS", ColumnKind::SetOf)
                .not_null(false)
                .default(EntryValue::Set(Vec::new())),
            Column::new("USERUPDATE", ColumnKind::Bool).default(EntryValue::Bool(false)),
        ];
        JournalsTable {
            table: Table::new("JOURNALS", columns),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn get(&self, conn: &Connection, id: i64) -> Result<Option<Entry>> {
        self.table.get(conn, &Value::Int(id))
    }

    pub fn save_journal(&self, conn: &Connection, entry: &Entry, exist_ok: bool) -> Result<()> {
        let mut entry = entry.clone();
        if let Some(author) = entry_get(&entry, "AUTHOR").and_then(EntryValue::as_text) {
            entry_insert(&mut entry, "AUTHOR", EntryValue::Text(normalize_username(author)));
        }
        let mode = if exist_ok {
            InsertMode::IgnoreExisting
        } else {
            InsertMode::Insert
        };
        self.table.insert(conn, &entry, mode)
    }

    pub fn set_user_update(&self, conn: &Connection, id: i64, value: bool) -> Result<bool> {
        let Some(entry) = self.get(conn, id)? else {
            return Err(Error::Key(format!("no such journal: {id}")));
        };
        if entry_get(&entry, "USERUPDATE").and_then(EntryValue::as_bool) == Some(value) {
            return Ok(false);
        }
        let mut new_entry = entry;
        entry_insert(&mut new_entry, "USERUPDATE", EntryValue::Bool(value));
        self.table
            .update(conn, &Selector::Eq("ID".into(), Value::Int(id)), &new_entry)?;
        Ok(true)
    }

    pub fn add_mention(&self, conn: &Connection, id: i64, username: &str) -> Result<bool> {
        self.table
            .add_to_list(conn, &Value::Int(id), "MENTIONS", &[normalize_username(username)])
    }

    pub fn remove_mention(&self, conn: &Connection, id: i64, username: &str) -> Result<bool> {
        self.table
            .remove_from_list(conn, &Value::Int(id), "MENTIONS", &[normalize_username(username)])
    }

    /// Free-text search over TITLE/CONTENT, scoped to TITLE by default.
    /// AUTHOR is matched the same way it's normalised on write.
    pub fn search(
        &self,
        conn: &Connection,
        query: &str,
        order: &[&str],
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Entry>> {
        let likes: HashSet<String> = ["title", "content", "author"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut aliases = HashMap::new();
        aliases.insert(
            "author".to_string(),
            "replace(lower(AUTHOR), '_', '')".to_string(),
        );
        self.table
            .select_query(conn, query, "title", &likes, &aliases, order, limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_mention_then_remove_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("t.db")).unwrap();
        let table = JournalsTable::new();
        table.table().create(&conn).unwrap();
        let mut entry = Entry::new();
        entry_insert(&mut entry, "ID", 1i64.into());
        entry_insert(&mut entry, "AUTHOR", "alice".into());
        entry_insert(&mut entry, "DATE", "2024-01-01T00:00:00".into());
        table.save_journal(&conn, &entry, false).unwrap();

        assert_eq!(table.add_mention(&conn, 1, "Bob").unwrap(), true);
        assert_eq!(table.add_mention(&conn, 1, "bob").unwrap(), false);
        assert_eq!(table.remove_mention(&conn, 1, "bob").unwrap(), true);
    }

    #[test]
    fn search_matches_title_by_default_field() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("t.db")).unwrap();
        let table = JournalsTable::new();
        table.table().create(&conn).unwrap();

        let mut entry = Entry::new();
        entry_insert(&mut entry, "ID", 1i64.into());
        entry_insert(&mut entry, "AUTHOR", "alice".into());
        entry_insert(&mut entry, "DATE", "2024-01-01T00:00:00".into());
        entry_insert(&mut entry, "TITLE", "Progress update".into());
        table.save_journal(&conn, &entry, false).unwrap();

        let rows = table.search(&conn, "progress", &[], None, None).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
