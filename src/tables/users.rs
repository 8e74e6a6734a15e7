use std::collections::{HashMap, HashSet};

use sqlite::Connection;

use crate::codec::ColumnKind;
use crate::column::Column;
use crate::error::{Error, Result};
use crate::selector::Selector;
use crate::table::{InsertMode, Table};
use crate::tables::normalize_username;
use crate::types::{entry_get, entry_insert, Entry, EntryValue, Value};

pub struct UsersTable {
    table: Table,
}

impl UsersTable {
    pub fn new() -> Self {
        let columns = vec![
            Column::new("USERNAME", ColumnKind::Text)
                .key(true)
                .check("length({name}) >= 1"),
            Column::new("FOLDERS", ColumnKind::SetOf)
                .not_null(false)
                .default(EntryValue::Set(Vec::new())),
            Column::new("ACTIVE", ColumnKind::Bool).default(EntryValue::Bool(true)),
            Column::new("USERPAGE", ColumnKind::Text)
                .not_null(false)
                .default(EntryValue::Text(String::new())),
        ];
        UsersTable {
            table: Table::new("USERS", columns),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn len(&self, conn: &Connection) -> Result<i64> {
        self.table.len(conn)
    }

    pub fn get(&self, conn: &Connection, username: &str) -> Result<Option<Entry>> {
        let key = Value::Text(normalize_username(username));
        self.table.get(conn, &key)
    }

    pub fn save_user(&self, conn: &Connection, entry: &Entry, exist_ok: bool) -> Result<()> {
        let mode = if exist_ok {
            InsertMode::IgnoreExisting
        } else {
            InsertMode::Insert
        };
        self.table.insert(conn, &normalized(entry), mode)
    }

    /// Returns whether ACTIVE actually changed.
    pub fn set_active(&self, conn: &Connection, username: &str, active: bool) -> Result<bool> {
        let key = normalize_username(username);
        let Some(entry) = self.get(conn, &key)? else {
            return Err(Error::Key(format!("no such user: {key}")));
        };
        if entry_get(&entry, "ACTIVE").and_then(EntryValue::as_bool) == Some(active) {
            return Ok(false);
        }
        let mut new_entry = entry;
        entry_insert(&mut new_entry, "ACTIVE", EntryValue::Bool(active));
        self.table
            .update(conn, &Selector::Eq("USERNAME".into(), Value::Text(key)), &new_entry)?;
        Ok(true)
    }

    pub fn add_folder(&self, conn: &Connection, username: &str, folder: &str) -> Result<bool> {
        let key = Value::Text(normalize_username(username));
        self.table
            .add_to_list(conn, &key, "FOLDERS", &[folder.to_string()])
    }

    pub fn remove_folder(&self, conn: &Connection, username: &str, folder: &str) -> Result<bool> {
        let key = Value::Text(normalize_username(username));
        self.table
            .remove_from_list(conn, &key, "FOLDERS", &[folder.to_string()])
    }

    /// Writes only if the page content actually changed.
    pub fn set_userpage(&self, conn: &Connection, username: &str, page: &str) -> Result<bool> {
        let key = normalize_username(username);
        let Some(entry) = self.get(conn, &key)? else {
            return Err(Error::Key(format!("no such user: {key}")));
        };
        if entry_get(&entry, "USERPAGE").and_then(EntryValue::as_text) == Some(page) {
            return Ok(false);
        }
        let mut new_entry = entry;
        entry_insert(&mut new_entry, "USERPAGE", EntryValue::Text(page.to_string()));
        self.table
            .update(conn, &Selector::Eq("USERNAME".into(), Value::Text(key)), &new_entry)?;
        Ok(true)
    }

    /// Free-text search over USERNAME/USERPAGE, scoped to USERNAME by
    /// default. USERNAME is matched the same way it's normalised on write:
    /// lower-cased with underscores stripped.
    pub fn search(
        &self,
        conn: &Connection,
        query: &str,
        order: &[&str],
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Entry>> {
        let likes: HashSet<String> = ["username", "userpage"].iter().map(|s| s.to_string()).collect();
        let mut aliases = HashMap::new();
        aliases.insert(
            "username".to_string(),
            "replace(lower(USERNAME), '_', '')".to_string(),
        );
        self.table
            .select_query(conn, query, "username", &likes, &aliases, order, limit, offset)
    }

    /// Rows with an empty USERNAME despite the CHECK constraint having been
    /// bypassed (e.g. a pre-migration row), surfaced for a caller-driven
    /// consistency report. Never repairs anything.
    pub fn errors(&self, conn: &Connection) -> Result<Vec<Entry>> {
        let rows = self.table.iter(conn)?;
        Ok(rows
            .into_iter()
            .filter(|row| {
                entry_get(row, "USERNAME")
                    .and_then(EntryValue::as_text)
                    .map(str::is_empty)
                    .unwrap_or(true)
            })
            .collect())
    }
}

fn normalized(entry: &Entry) -> Entry {
    let mut entry = entry.clone();
    if let Some(username) = entry_get(&entry, "USERNAME").and_then(EntryValue::as_text) {
        let normalized = normalize_username(username);
        entry_insert(&mut entry, "USERNAME", EntryValue::Text(normalized));
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("t.db")).unwrap();
        (dir, conn)
    }

    fn user_entry(username: &str) -> Entry {
        let mut entry = Entry::new();
        entry_insert(&mut entry, "USERNAME", EntryValue::Text(username.to_string()));
        entry
    }

    #[test]
    fn save_user_normalises_username_on_write() {
        let (_dir, conn) = open();
        let table = UsersTable::new();
        table.table().create(&conn).unwrap();
        table.save_user(&conn, &user_entry("Artist_A"), false).unwrap();
        assert!(table.get(&conn, "artist_a").unwrap().is_some());
    }

    #[test]
    fn set_active_reports_no_change_when_already_set() {
        let (_dir, conn) = open();
        let table = UsersTable::new();
        table.table().create(&conn).unwrap();
        table.save_user(&conn, &user_entry("bob"), false).unwrap();
        assert_eq!(table.set_active(&conn, "bob", true).unwrap(), false);
        assert_eq!(table.set_active(&conn, "bob", false).unwrap(), true);
    }

    #[test]
    fn search_matches_username_case_insensitively() {
        let (_dir, conn) = open();
        let table = UsersTable::new();
        table.table().create(&conn).unwrap();
        table.save_user(&conn, &user_entry("Artist_A"), false).unwrap();
        table.save_user(&conn, &user_entry("someoneelse"), false).unwrap();

        let rows = table.search(&conn, "artista", &[], None, None).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
