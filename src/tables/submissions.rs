use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use sqlite::Connection;

use crate::codec::{ColumnKind, DateTimePrecision};
use crate::column::Column;
use crate::error::{Error, Result};
use crate::files::{self, filesaved};
use crate::selector::Selector;
use crate::table::{InsertMode, Table};
use crate::tables::normalize_username;
use crate::types::{entry_get, entry_insert, Entry, EntryValue, Value};

pub const TYPES: &[&str] = &["image", "music", "text", "flash"];
pub const FOLDERS: &[&str] = &["gallery", "scraps"];

pub struct SubmissionsTable {
    table: Table,
}

impl SubmissionsTable {
    pub fn new() -> Self {
        let columns = vec![
            Column::new("ID", ColumnKind::Int).key(true).check("{name} > 0"),
            Column::new("AUTHOR", ColumnKind::Text).check("length({name}) >= 1"),
            Column::new("TITLE", ColumnKind::Text)
                .not_null(false)
                .default(EntryValue::Text(String::new())),
            Column::new("DATE", ColumnKind::DateTime(DateTimePrecision::Seconds)),
            Column::new("DESCRIPTION", ColumnKind::Text)
                .not_null(false)
                .default(EntryValue::Text(String::new())),
            Column::new("FOOTER", ColumnKind::Text)
                .not_null(false)
                .default(EntryValue::Text(String::new())),
            Column::new("TAGS", ColumnKind::ListOf)
                .not_null(false)
                .default(EntryValue::List(Vec::new())),
            Column::new("CATEGORY", ColumnKind::Text)
                .not_null(false)
                .default(EntryValue::Text(String::new())),
            Column::new("SPECIES", ColumnKind::Text)
                .not_null(false)
                .default(EntryValue::Text(String::new())),
            Column::new("GENDER", ColumnKind::Text)
                .not_null(false)
                .default(EntryValue::Text(String::new())),
            Column::new("RATING", ColumnKind::Text)
                .not_null(false)
                .default(EntryValue::Text(String::new())),
            Column::new("TYPE", ColumnKind::Text)
                .check("{name} in ('image', 'music', 'text', 'flash')"),
            Column::new("FILEURL", ColumnKind::ListOf)
                .not_null(false)
                .default(EntryValue::List(Vec::new())),
            Column::new("FILEEXT", ColumnKind::ListOf)
                .not_null(false)
                .default(EntryValue::List(Vec::new())),
            Column::new("FILESAVED", ColumnKind::Int).default(EntryValue::Int(0)),
            Column::new("FAVORITE", ColumnKind::SetOf)
                .not_null(false)
                .default(EntryValue::Set(Vec::new())),
            Column::new("MENTIONS", ColumnKind::SetOf)
                .not_null(false)
                .default(EntryValue::Set(Vec::new())),
            Column::new("FOLDER", ColumnKind::Text).check("{name} in ('gallery', 'scraps')"),
            Column::new("USERUPDATE", ColumnKind::Bool).default(EntryValue::Bool(false)),
        ];
        SubmissionsTable {
            table: Table::new("SUBMISSIONS", columns),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn get(&self, conn: &Connection, id: i64) -> Result<Option<Entry>> {
        self.table.get(conn, &Value::Int(id))
    }

    /// Format `entry`, write every non-empty file under its tiered path
    /// (naming them `submission`, `submission1`, … in parallel with
    /// `FILEURL`), write the thumbnail as `thumbnail.jpg`, compute
    /// `FILESAVED` and insert the row.
    pub fn save_submission(
        &self,
        conn: &Connection,
        files_root: &Path,
        entry: &Entry,
        file_contents: &[Vec<u8>],
        thumbnail: Option<&[u8]>,
        replace: bool,
        exist_ok: bool,
    ) -> Result<Entry> {
        let mut entry = entry.clone();
        if let Some(author) = entry_get(&entry, "AUTHOR").and_then(EntryValue::as_text) {
            entry_insert(&mut entry, "AUTHOR", EntryValue::Text(normalize_username(author)));
        }
        let id = entry_get(&entry, "ID")
            .and_then(EntryValue::as_int)
            .ok_or_else(|| Error::Schema("submission entry is missing ID".to_string()))?;

        let folder = files::entry_folder(files_root, id as u64);
        let file_urls: Vec<String> = entry_get(&entry, "FILEURL")
            .and_then(EntryValue::as_list)
            .map(<[String]>::to_vec)
            .unwrap_or_default();

        let mut extensions = Vec::with_capacity(file_contents.len());
        let mut any_file = false;
        let mut all_files = !file_contents.is_empty();
        for (index, content) in file_contents.iter().enumerate() {
            if content.is_empty() {
                all_files = false;
                continue;
            }
            let extension = extension_for(file_urls.get(index).map(String::as_str), content);
            let name = files::submission_file_name(index, Some(&extension));
            files::write_file(&folder.join(&name), content)?;
            extensions.push(extension);
            any_file = true;
        }

        let thumbnail_saved = match thumbnail {
            Some(bytes) if !bytes.is_empty() => {
                files::write_file(&folder.join(files::THUMBNAIL_FILE_NAME), bytes)?;
                true
            }
            _ => false,
        };

        let mut filesaved = 0i64;
        if thumbnail_saved {
            filesaved |= filesaved::THUMBNAIL;
        }
        if any_file {
            filesaved |= filesaved::ANY_FILE;
        }
        if all_files && any_file {
            filesaved |= filesaved::ALL_FILES;
        }

        entry_insert(&mut entry, "FILEEXT", EntryValue::List(extensions));
        entry_insert(&mut entry, "FILESAVED", EntryValue::Int(filesaved));

        let mode = if replace {
            InsertMode::Replace
        } else if exist_ok {
            InsertMode::IgnoreExisting
        } else {
            InsertMode::Insert
        };
        self.table.insert(conn, &entry, mode)?;
        self.get(conn, id)?.ok_or_else(|| Error::Key(format!("submission {id} missing after insert")))
    }

    /// `(files, thumbnail)` according to `FILESAVED` bits, built from
    /// `FILEEXT` and the tiered path.
    pub fn get_submission_files(
        &self,
        conn: &Connection,
        files_root: &Path,
        id: i64,
    ) -> Result<(Option<Vec<PathBuf>>, Option<PathBuf>)> {
        let Some(entry) = self.get(conn, id)? else {
            return Err(Error::Key(format!("no such submission: {id}")));
        };
        let saved = entry_get(&entry, "FILESAVED").and_then(EntryValue::as_int).unwrap_or(0);
        let folder = files::entry_folder(files_root, id as u64);

        let file_paths = if saved & filesaved::ANY_FILE != 0 {
            let extensions = entry_get(&entry, "FILEEXT")
                .and_then(EntryValue::as_list)
                .map(<[String]>::to_vec)
                .unwrap_or_default();
            Some(
                extensions
                    .iter()
                    .enumerate()
                    .map(|(index, ext)| {
                        let name = files::submission_file_name(index, Some(ext));
                        folder.join(name)
                    })
                    .collect(),
            )
        } else {
            None
        };

        let thumbnail_path = if saved & filesaved::THUMBNAIL != 0 {
            Some(folder.join(files::THUMBNAIL_FILE_NAME))
        } else {
            None
        };

        Ok((file_paths, thumbnail_path))
    }

    pub fn set_filesaved(&self, conn: &Connection, id: i64, value: i64) -> Result<bool> {
        self.read_modify_write_int(conn, id, "FILESAVED", value)
    }

    pub fn set_folder(&self, conn: &Connection, id: i64, folder: &str) -> Result<bool> {
        self.read_modify_write_text(conn, id, "FOLDER", folder)
    }

    pub fn set_user_update(&self, conn: &Connection, id: i64, value: bool) -> Result<bool> {
        let Some(entry) = self.get(conn, id)? else {
            return Err(Error::Key(format!("no such submission: {id}")));
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

    pub fn add_favorite(&self, conn: &Connection, id: i64, username: &str) -> Result<bool> {
        self.table
            .add_to_list(conn, &Value::Int(id), "FAVORITE", &[normalize_username(username)])
    }

    pub fn remove_favorite(&self, conn: &Connection, id: i64, username: &str) -> Result<bool> {
        self.table
            .remove_from_list(conn, &Value::Int(id), "FAVORITE", &[normalize_username(username)])
    }

    pub fn add_mention(&self, conn: &Connection, id: i64, username: &str) -> Result<bool> {
        self.table
            .add_to_list(conn, &Value::Int(id), "MENTIONS", &[normalize_username(username)])
    }

    pub fn remove_mention(&self, conn: &Connection, id: i64, username: &str) -> Result<bool> {
        self.table
            .remove_from_list(conn, &Value::Int(id), "MENTIONS", &[normalize_username(username)])
    }

    /// Rows with an empty AUTHOR, or a FILESAVED bit pattern outside
    /// `0..=7`, surfaced for a caller-driven consistency report.
    pub fn errors(&self, conn: &Connection) -> Result<Vec<Entry>> {
        let rows = self.table.iter(conn)?;
        Ok(rows
            .into_iter()
            .filter(|row| {
                let author_empty = entry_get(row, "AUTHOR")
                    .and_then(EntryValue::as_text)
                    .map(str::is_empty)
                    .unwrap_or(true);
                let bad_filesaved = entry_get(row, "FILESAVED")
                    .and_then(EntryValue::as_int)
                    .map(|v| !(0..=7).contains(&v))
                    .unwrap_or(true);
                author_empty || bad_filesaved
            })
            .collect())
    }

    /// Free-text search over TITLE/DESCRIPTION/TAGS, scoped to TITLE by
    /// default. AUTHOR is matched the same way it's normalised on write.
    pub fn search(
        &self,
        conn: &Connection,
        query: &str,
        order: &[&str],
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Entry>> {
        let likes: HashSet<String> = ["title", "description", "tags", "author"]
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

    fn read_modify_write_int(&self, conn: &Connection, id: i64, column: &str, value: i64) -> Result<bool> {
        let Some(entry) = self.get(conn, id)? else {
            return Err(Error::Key(format!("no such submission: {id}")));
        };
        if entry_get(&entry, column).and_then(EntryValue::as_int) == Some(value) {
            return Ok(false);
        }
        let mut new_entry = entry;
        entry_insert(&mut new_entry, column, EntryValue::Int(value));
        self.table
            .update(conn, &Selector::Eq("ID".into(), Value::Int(id)), &new_entry)?;
        Ok(true)
    }

    fn read_modify_write_text(&self, conn: &Connection, id: i64, column: &str, value: &str) -> Result<bool> {
        let Some(entry) = self.get(conn, id)? else {
            return Err(Error::Key(format!("no such submission: {id}")));
        };
        if entry_get(&entry, column).and_then(EntryValue::as_text) == Some(value) {
            return Ok(false);
        }
        let mut new_entry = entry;
        entry_insert(&mut new_entry, column, EntryValue::Text(value.to_string()));
        self.table
            .update(conn, &Selector::Eq("ID".into(), Value::Int(id)), &new_entry)?;
        Ok(true)
    }
}

/// Derive the extension from the URL's basename suffix unless the sniffing
/// utility confidently detects a different, specific type.
fn extension_for(url: Option<&str>, content: &[u8]) -> String {
    let guessed = files::guess_extension(content);
    let from_url = url
        .and_then(|u| u.rsplit('.').next())
        .filter(|e| !e.is_empty() && e.len() <= 6);
    match from_url {
        Some(ext) if ext.eq_ignore_ascii_case(guessed) || guessed == "bin" => ext.to_ascii_lowercase(),
        Some(_) => guessed.to_string(),
        None => guessed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_entry(id: i64) -> Entry {
        let mut entry = Entry::new();
        entry_insert(&mut entry, "ID", id.into());
        entry_insert(&mut entry, "AUTHOR", "Artist_A".into());
        entry_insert(&mut entry, "TITLE", "t".into());
        entry_insert(&mut entry, "DATE", "2024-01-02T00:00:00".into());
        entry_insert(&mut entry, "FILEURL", EntryValue::List(vec!["https://x/y.png".to_string()]));
        entry_insert(&mut entry, "FOLDER", "gallery".into());
        entry_insert(&mut entry, "TYPE", "image".into());
        entry
    }

    #[test]
    fn save_submission_computes_filesaved_and_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("t.db")).unwrap();
        let table = SubmissionsTable::new();
        table.table().create(&conn).unwrap();

        let files_root = dir.path().join("files");
        let saved = table
            .save_submission(
                &conn,
                &files_root,
                &base_entry(1),
                &[b"PNG content".to_vec()],
                Some(b"JPG content"),
                false,
                false,
            )
            .unwrap();

        assert_eq!(entry_get(&saved, "FILESAVED").and_then(EntryValue::as_int), Some(7));
        let expected_file = files_root.join("00/00/00/00/01/submission.png");
        assert!(expected_file.exists());
        let expected_thumb = files_root.join("00/00/00/00/01/thumbnail.jpg");
        assert!(expected_thumb.exists());
    }

    #[test]
    fn favorite_add_then_remove_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("t.db")).unwrap();
        let table = SubmissionsTable::new();
        table.table().create(&conn).unwrap();
        table
            .save_submission(&conn, &dir.path().join("files"), &base_entry(1), &[], None, false, false)
            .unwrap();

        assert_eq!(table.add_favorite(&conn, 1, "Bob").unwrap(), true);
        assert_eq!(table.add_favorite(&conn, 1, "bob").unwrap(), false);
        assert_eq!(table.remove_favorite(&conn, 1, "bob").unwrap(), true);

        let entry = table.get(&conn, 1).unwrap().unwrap();
        let favorite = entry_get(&entry, "FAVORITE").and_then(EntryValue::as_list).unwrap();
        assert!(favorite.is_empty());
    }

    #[test]
    fn search_matches_title_by_default_field() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("t.db")).unwrap();
        let table = SubmissionsTable::new();
        table.table().create(&conn).unwrap();

        let mut entry = base_entry(1);
        entry_insert(&mut entry, "TITLE", "Sunset over the bay".into());
        table
            .save_submission(&conn, &dir.path().join("files"), &entry, &[], None, false, false)
            .unwrap();

        let rows = table.search(&conn, "sunset", &[], None, None).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
