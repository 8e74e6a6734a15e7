//! Cursor-driven merge of one repository instance into another, including
//! file-tree transfer for submissions.

use tracing::{info, info_span};

use crate::db::{compare_version, Database, VersionPrecision};
use crate::error::{Error, Result};
use crate::files;
use crate::table::InsertMode;
use crate::types::{entry_get, Entry, EntryValue, Value};

#[derive(Clone, Copy, Debug)]
pub struct MergeOptions {
    pub replace: bool,
    pub exist_ok: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            replace: false,
            exist_ok: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct MergeReport {
    pub users_inserted: usize,
    pub submissions_inserted: usize,
    pub journals_inserted: usize,
    pub comments_inserted: usize,
    pub history_inserted: usize,
    pub files_copied: usize,
}

/// Merge `source` into `dest`, copying rows and (for submissions) on-disk
/// file trees. Checks every precondition in one pass before writing
/// anything.
pub fn merge(dest: &mut Database, source: &Database, options: MergeOptions) -> Result<MergeReport> {
    let span = info_span!("merge", source = %source.path().display());
    let _guard = span.enter();

    check_preconditions(dest, source)?;

    let mut report = MergeReport::default();

    for row in source.users.table().iter(source.connection())? {
        let key = entry_get(&row, "USERNAME").and_then(EntryValue::as_text).unwrap_or_default();
        if !options.replace && dest.users.table().get(dest.connection(), &Value::Text(key.to_string()))?.is_some() {
            continue;
        }
        dest.users.table().insert(dest.connection(), &row, insert_mode(options))?;
        report.users_inserted += 1;
    }

    let dest_files_root = dest.files_folder()?;
    let source_files_root = source.files_folder()?;
    for row in source.submissions.table().iter(source.connection())? {
        let id = entry_get(&row, "ID").and_then(EntryValue::as_int).unwrap_or_default();
        if !options.replace && dest.submissions.table().get(dest.connection(), &Value::Int(id))?.is_some() {
            continue;
        }

        let src_folder = files::entry_folder(&source_files_root, id as u64);
        let dst_folder = files::entry_folder(&dest_files_root, id as u64);
        report.files_copied += files::copy_tree_non_overwriting(&src_folder, &dst_folder)?;

        let (file_contents, thumbnail) = read_submission_payloads(&row, &src_folder)?;
        dest.submissions.save_submission(
            dest.connection(),
            &dest_files_root,
            &row,
            &file_contents,
            thumbnail.as_deref(),
            options.replace,
            options.exist_ok,
        )?;
        report.submissions_inserted += 1;
    }

    for row in source.journals.table().iter(source.connection())? {
        let id = entry_get(&row, "ID").and_then(EntryValue::as_int).unwrap_or_default();
        if !options.replace && dest.journals.table().get(dest.connection(), &Value::Int(id))?.is_some() {
            continue;
        }
        dest.journals.table().insert(dest.connection(), &row, insert_mode(options))?;
        report.journals_inserted += 1;
    }

    for row in source.comments.table().iter(source.connection())? {
        dest.comments.table().insert(dest.connection(), &row, InsertMode::IgnoreExisting)?;
        report.comments_inserted += 1;
    }

    for row in source.history.table().iter(source.connection())? {
        dest.history.table().insert(dest.connection(), &row, InsertMode::IgnoreExisting)?;
        report.history_inserted += 1;
    }

    info!(?report, "merge complete");
    Ok(report)
}

fn insert_mode(options: MergeOptions) -> InsertMode {
    if options.replace {
        InsertMode::Replace
    } else if options.exist_ok {
        InsertMode::IgnoreExisting
    } else {
        InsertMode::Insert
    }
}

fn check_preconditions(dest: &Database, source: &Database) -> Result<()> {
    if !dest.settings.is_formatted(dest.connection()) {
        return Err(Error::Database("destination database is not formatted".to_string()));
    }
    if dest.path() == source.path() {
        return Err(Error::Database("cannot merge a database into itself".to_string()));
    }

    let dest_version = dest.settings.version(dest.connection())?;
    compare_version(&dest_version, crate::db::BUILD_VERSION, VersionPrecision::Patch)?;

    let source_version = source.settings.version(source.connection())?;
    compare_version(&source_version, &dest_version, VersionPrecision::Patch)?;

    let dest_columns = dest.submissions.table().columns.len();
    let source_columns = source.submissions.table().columns.len();
    if dest_columns != source_columns {
        return Err(Error::Schema(
            "source and destination submissions column sets differ".to_string(),
        ));
    }

    let dest_bbcode = dest.settings.bbcode(dest.connection())?;
    let source_bbcode = source.settings.bbcode(source.connection())?;
    if dest_bbcode != source_bbcode {
        return Err(Error::Schema("BBCODE setting differs between source and destination".to_string()));
    }

    Ok(())
}

fn read_submission_payloads(row: &Entry, folder: &std::path::Path) -> Result<(Vec<Vec<u8>>, Option<Vec<u8>>)> {
    let extensions = entry_get(row, "FILEEXT")
        .and_then(EntryValue::as_list)
        .map(<[String]>::to_vec)
        .unwrap_or_default();

    let mut file_contents = Vec::with_capacity(extensions.len());
    for (index, ext) in extensions.iter().enumerate() {
        let name = files::submission_file_name(index, Some(ext));
        let path = folder.join(&name);
        let content = if path.exists() { files::read_file(&path)? } else { Vec::new() };
        file_contents.push(content);
    }

    let thumbnail_path = folder.join(files::THUMBNAIL_FILE_NAME);
    let thumbnail = if thumbnail_path.exists() {
        Some(files::read_file(&thumbnail_path)?)
    } else {
        None
    };

    Ok((file_contents, thumbnail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::OpenOptions;
    use crate::types::{entry_insert, Entry};

    fn user_entry(username: &str) -> Entry {
        let mut entry = Entry::new();
        entry_insert(&mut entry, "USERNAME", EntryValue::Text(username.to_string()));
        entry
    }

    fn submission_entry(id: i64, title: &str) -> Entry {
        let mut entry = Entry::new();
        entry_insert(&mut entry, "ID", EntryValue::Int(id));
        entry_insert(&mut entry, "AUTHOR", EntryValue::Text("Artist_A".to_string()));
        entry_insert(&mut entry, "TITLE", EntryValue::Text(title.to_string()));
        entry_insert(&mut entry, "DATE", EntryValue::Text("2024-01-02T00:00:00".to_string()));
        entry_insert(&mut entry, "FILEURL", EntryValue::List(vec!["https://x/y.png".to_string()]));
        entry_insert(&mut entry, "FOLDER", EntryValue::Text("gallery".to_string()));
        entry_insert(&mut entry, "TYPE", EntryValue::Text("image".to_string()));
        entry
    }

    #[test]
    fn merge_copies_new_user_and_skips_existing() {
        let dest_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let mut dest = Database::open(dest_dir.path().join("dest.db"), OpenOptions::default()).unwrap();
        let source = Database::open(source_dir.path().join("src.db"), OpenOptions::default()).unwrap();

        dest.users.save_user(dest.connection(), &user_entry("alice"), false).unwrap();
        source.users.save_user(source.connection(), &user_entry("alice"), false).unwrap();
        source.users.save_user(source.connection(), &user_entry("bob"), false).unwrap();

        let report = merge(&mut dest, &source, MergeOptions::default()).unwrap();
        assert_eq!(report.users_inserted, 1);
        assert!(dest.users.get(dest.connection(), "bob").unwrap().is_some());
    }

    #[test]
    fn merge_copies_submission_file_tree_preserves_filesaved_and_skips_existing() {
        let dest_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let mut dest = Database::open(dest_dir.path().join("dest.db"), OpenOptions::default()).unwrap();
        let source = Database::open(source_dir.path().join("src.db"), OpenOptions::default()).unwrap();

        let source_files_root = source.files_folder().unwrap();
        let dest_files_root = dest.files_folder().unwrap();

        // ID 1 exists on both sides; the destination's row and files must win.
        dest.submissions
            .save_submission(
                dest.connection(),
                &dest_files_root,
                &submission_entry(1, "dest original"),
                &[],
                None,
                false,
                false,
            )
            .unwrap();
        source
            .submissions
            .save_submission(
                source.connection(),
                &source_files_root,
                &submission_entry(1, "source version"),
                &[],
                None,
                false,
                false,
            )
            .unwrap();

        // ID 2 only exists on source, with a file and a thumbnail to carry over.
        source
            .submissions
            .save_submission(
                source.connection(),
                &source_files_root,
                &submission_entry(2, "new submission"),
                &[b"PNG content".to_vec()],
                Some(b"JPG thumb"),
                false,
                false,
            )
            .unwrap();

        let report = merge(&mut dest, &source, MergeOptions::default()).unwrap();
        assert_eq!(report.submissions_inserted, 1);
        assert_eq!(report.files_copied, 2);

        let kept = dest.submissions.get(dest.connection(), 1).unwrap().unwrap();
        assert_eq!(
            entry_get(&kept, "TITLE").and_then(EntryValue::as_text),
            Some("dest original")
        );

        let merged = dest.submissions.get(dest.connection(), 2).unwrap().unwrap();
        assert_eq!(entry_get(&merged, "FILESAVED").and_then(EntryValue::as_int), Some(0b111));

        assert!(dest_files_root.join("00/00/00/00/02/submission.png").exists());
        assert!(dest_files_root.join("00/00/00/00/02/thumbnail.jpg").exists());
    }
}
