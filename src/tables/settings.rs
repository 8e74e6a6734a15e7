use sqlite::Connection;

use crate::codec::ColumnKind;
use crate::column::Column;
use crate::db::{BUILD_VERSION, DEFAULT_FILES_FOLDER};
use crate::error::{Error, Result};
use crate::selector::Selector;
use crate::table::{InsertMode, Table};
use crate::types::{entry_get, Entry, EntryValue, Value};

pub const KEY_VERSION: &str = "VERSION";
pub const KEY_FILESFOLDER: &str = "FILESFOLDER";
pub const KEY_BACKUPFOLDER: &str = "BACKUPFOLDER";
pub const KEY_BBCODE: &str = "BBCODE";

/// Key/value settings, projected scalar-through-`SVALUE`.
pub struct SettingsTable {
    table: Table,
}

impl SettingsTable {
    pub fn new() -> Self {
        let columns = vec![
            Column::new("SETTING", ColumnKind::Text)
                .key(true)
                .check("length({name}) >= 1"),
            Column::new("SVALUE", ColumnKind::Text)
                .not_null(false)
                .check("SVALUE is null or length(SVALUE) >= 1"),
        ];
        SettingsTable {
            table: Table::new("SETTINGS", columns),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Seed `FILESFOLDER` and `VERSION` on a freshly created store, only
    /// when absent.
    pub fn seed_defaults(&self, conn: &Connection) -> Result<()> {
        if self.get(conn, KEY_FILESFOLDER)?.is_none() {
            self.set(conn, KEY_FILESFOLDER, Some(DEFAULT_FILES_FOLDER))?;
        }
        if self.get(conn, KEY_VERSION)?.is_none() {
            self.set(conn, KEY_VERSION, Some(BUILD_VERSION))?;
        }
        Ok(())
    }

    pub fn get(&self, conn: &Connection, setting: &str) -> Result<Option<String>> {
        let entry = self.table.get(conn, &Value::Text(setting.to_string()))?;
        Ok(entry.and_then(|e| entry_get(&e, "SVALUE").and_then(EntryValue::as_text).map(str::to_string)))
    }

    pub fn set(&self, conn: &Connection, setting: &str, value: Option<&str>) -> Result<()> {
        let mut entry = Entry::new();
        crate::types::entry_insert(&mut entry, "SETTING", EntryValue::Text(setting.to_string()));
        crate::types::entry_insert(
            &mut entry,
            "SVALUE",
            match value {
                Some(v) => EntryValue::Text(v.to_string()),
                None => EntryValue::Null,
            },
        );
        self.table.insert(conn, &entry, InsertMode::Replace)
    }

    pub fn version(&self, conn: &Connection) -> Result<String> {
        self.get(conn, KEY_VERSION)?
            .ok_or_else(|| Error::Version("VERSION setting is missing".to_string()))
    }

    pub fn files_folder(&self, conn: &Connection) -> Result<String> {
        Ok(self
            .get(conn, KEY_FILESFOLDER)?
            .unwrap_or_else(|| DEFAULT_FILES_FOLDER.to_string()))
    }

    pub fn backup_folder(&self, conn: &Connection) -> Result<String> {
        self.get(conn, KEY_BACKUPFOLDER)?
            .ok_or_else(|| Error::Database("BACKUPFOLDER setting is not configured".to_string()))
    }

    pub fn bbcode(&self, conn: &Connection) -> Result<bool> {
        Ok(self
            .get(conn, KEY_BBCODE)?
            .map(|v| v == "true")
            .unwrap_or(false))
    }

    pub fn set_bbcode(&self, conn: &Connection, value: bool) -> Result<()> {
        self.set(conn, KEY_BBCODE, Some(if value { "true" } else { "false" }))
    }

    /// Check the store is "formatted": SETTINGS exists and VERSION is set.
    /// Used by the merge engine's precondition checks, not by `open` (which
    /// performs its own cheaper probe against `sqlite_master`).
    pub fn is_formatted(&self, conn: &Connection) -> bool {
        self.version(conn).is_ok()
    }

    pub fn selector_for(setting: &str) -> Selector {
        Selector::Eq("SETTING".into(), Value::Text(setting.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("t.db")).unwrap();
        (dir, conn)
    }

    #[test]
    fn seed_defaults_sets_version_and_folder_once() {
        let (_dir, conn) = open();
        let settings = SettingsTable::new();
        settings.table().create(&conn).unwrap();
        settings.seed_defaults(&conn).unwrap();
        assert_eq!(settings.version(&conn).unwrap(), BUILD_VERSION);
        settings.set(&conn, KEY_VERSION, Some("9.9.9")).unwrap();
        settings.seed_defaults(&conn).unwrap();
        assert_eq!(settings.version(&conn).unwrap(), "9.9.9");
    }

    #[test]
    fn bbcode_defaults_to_false() {
        let (_dir, conn) = open();
        let settings = SettingsTable::new();
        settings.table().create(&conn).unwrap();
        assert_eq!(settings.bbcode(&conn).unwrap(), false);
        settings.set_bbcode(&conn, true).unwrap();
        assert_eq!(settings.bbcode(&conn).unwrap(), true);
    }
}
