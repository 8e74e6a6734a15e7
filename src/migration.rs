//! Schema migration: moves a store from any historically supported version
//! up to the current build version, one logical hop at a time.
//!
//! Every step builds a fresh schema in a sibling file, attaches it to the
//! source connection, streams rows across with whatever value rewriting
//! that hop requires, then swaps the files and renames the original aside
//! for rollback.

use std::fs;
use std::path::{Path, PathBuf};

use sqlite::{Connection, State};
use tracing::{info, info_span, warn};

use crate::codec::{ColumnKind, DateTimePrecision};
use crate::column::Column;
use crate::db::{compare_version, VersionPrecision, BUILD_VERSION};
use crate::error::{Error, Result};
use crate::table::Table;
use crate::tables::comments::CommentsTable;
use crate::tables::history::HistoryTable;
use crate::tables::journals::JournalsTable;
use crate::tables::settings::SettingsTable;
use crate::tables::submissions::SubmissionsTable;
use crate::tables::users::UsersTable;
use crate::types::EntryValue;

pub const NEW_SCHEMA_ALIAS: &str = "db_new";

/// Outcome of a single migration hop.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub from_version: String,
    pub to_version: String,
    pub messages: Vec<String>,
}

type StepFn = fn(&Connection, &Path, &Path) -> Result<StepReport>;

struct MigrationStep {
    from: &'static str,
    to: &'static str,
    run: StepFn,
}

static MIGRATION_STEPS: &[MigrationStep] = &[
    MigrationStep { from: "4.19.0", to: "5.0.0", run: step_4_19_to_5_0 },
    MigrationStep { from: "5.0.0", to: "5.0.10", run: step_5_0_to_5_0_10 },
    MigrationStep { from: "5.0.10", to: "5.1.0", run: step_5_0_10_to_5_1 },
    MigrationStep { from: "5.1.0", to: "5.1.2", run: step_5_1_to_5_1_2 },
    MigrationStep { from: "5.1.2", to: "5.2.0", run: step_patch_only },
    MigrationStep { from: "5.2.0", to: "5.2.2", run: step_patch_only },
    MigrationStep { from: "5.2.2", to: "5.3.0", run: step_5_2_to_5_3 },
    MigrationStep { from: "5.3.0", to: "5.3.4", run: step_5_3_to_5_3_4 },
    MigrationStep { from: "5.3.4", to: "5.4.0", run: step_5_3_4_to_5_4 },
];

/// Run every step whose `from` is `>=` the on-disk version, in order, until
/// the store reaches [`BUILD_VERSION`]. Versions older than the lowest
/// supported step are rejected.
pub fn upgrade(path: &Path) -> Result<()> {
    let mut current_path = path.to_path_buf();
    let mut conn = Connection::open(&current_path)?;
    let mut version = read_version(&conn)?;

    if compare_version(&version, MIGRATION_STEPS[0].from, VersionPrecision::Patch).is_err()
        && version_order(&version) < version_order(MIGRATION_STEPS[0].from)
    {
        return Err(Error::Version(format!(
            "version {version} predates the lowest supported migration step {}",
            MIGRATION_STEPS[0].from
        )));
    }

    for step in MIGRATION_STEPS {
        if version_order(&version) >= version_order(BUILD_VERSION) {
            break;
        }
        if version_order(&version) < version_order(step.from) {
            continue;
        }
        let span = info_span!("migration_step", from = step.from, to = step.to);
        let _guard = span.enter();

        let report = run_step(step, &mut conn, &current_path)?;
        info!(messages = ?report.messages, "migration step complete");
        version = report.to_version.clone();
        current_path = path.to_path_buf();
    }

    Ok(())
}

fn version_order(v: &str) -> [u32; 3] {
    let main = v.split('-').next().unwrap_or(v);
    let mut parts = [0u32; 3];
    for (i, piece) in main.split('.').enumerate().take(3) {
        parts[i] = piece.parse().unwrap_or(0);
    }
    parts
}

fn read_version(conn: &Connection) -> Result<String> {
    let mut statement = conn.prepare("select SVALUE from SETTINGS where SETTING = 'VERSION'")?;
    match statement.next()? {
        State::Row => {
            let value: Option<String> = statement.read(0)?;
            value.ok_or_else(|| Error::Version("VERSION setting is null".to_string()))
        }
        State::Done => Err(Error::Version("store has no VERSION setting".to_string())),
    }
}

/// Wrap one step with the staging/rollback contract: create `.new_<name>`,
/// unlink any stale attempt, run the step, then on success rename the
/// original aside and promote the staged file; on failure remove the
/// staged file and leave the original untouched.
fn run_step(step: &MigrationStep, conn: &mut Connection, old_path: &Path) -> Result<StepReport> {
    let new_path = staged_path(old_path);
    if new_path.exists() {
        warn!(path = %new_path.display(), "removing stale migration artefact");
        fs::remove_file(&new_path).map_err(|e| Error::io(&new_path, e))?;
    }

    let result = (step.run)(conn, old_path, &new_path);
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            let _ = fs::remove_file(&new_path);
            return Err(err);
        }
    };

    let rollback_path = rollback_path(old_path, step.from);
    fs::rename(old_path, &rollback_path).map_err(|e| Error::io(&rollback_path, e))?;
    fs::rename(&new_path, old_path).map_err(|e| Error::io(old_path, e))?;
    *conn = Connection::open(old_path)?;

    Ok(report)
}

fn staged_path(original: &Path) -> PathBuf {
    sibling_with_prefix(original, ".new_")
}

fn rollback_path(original: &Path, from_version: &str) -> PathBuf {
    let tag = from_version.replace('.', "_");
    sibling_with_prefix(original, &format!("v{tag}_"))
}

fn sibling_with_prefix(original: &Path, prefix: &str) -> PathBuf {
    let file_name = original.file_name().and_then(|n| n.to_str()).unwrap_or("store.db");
    original.with_file_name(format!("{prefix}{file_name}"))
}

/// Attach `new_path` under [`NEW_SCHEMA_ALIAS`] and create the schema each
/// table needs for this hop. USERS/JOURNALS/SUBMISSIONS are the three
/// tables whose column set has changed across the supported version range,
/// so their destination schema is picked per-call: by default it is
/// introspected from what's actually on disk (via [`Table::introspect`])
/// so a hop that doesn't touch a table's columns reproduces them verbatim;
/// a `force_*_current` flag overrides that for the exact hop that adds the
/// marker column in question, since the on-disk source doesn't have it yet
/// but the destination must.
fn build_fresh_schema(
    conn: &Connection,
    new_path: &Path,
    force_users_current: bool,
    force_journals_current: bool,
    force_submissions_current: bool,
) -> Result<()> {
    let users = users_schema(conn, force_users_current)?;
    let journals = journals_schema(conn, force_journals_current)?;
    let submissions = submissions_schema(conn, force_submissions_current)?;

    conn.execute(format!(
        "attach database '{}' as {NEW_SCHEMA_ALIAS};",
        new_path.display()
    ))?;
    users.create_in(conn, NEW_SCHEMA_ALIAS)?;
    submissions.create_in(conn, NEW_SCHEMA_ALIAS)?;
    journals.create_in(conn, NEW_SCHEMA_ALIAS)?;
    CommentsTable::new().table().create_in(conn, NEW_SCHEMA_ALIAS)?;
    SettingsTable::new().table().create_in(conn, NEW_SCHEMA_ALIAS)?;
    HistoryTable::new().table().create_in(conn, NEW_SCHEMA_ALIAS)?;
    Ok(())
}

fn users_schema(conn: &Connection, force_current: bool) -> Result<Table> {
    if force_current {
        return Ok(UsersTable::new().table().clone());
    }
    let columns = Table::introspect(conn, "USERS")?;
    if columns.iter().any(|c| c.eq_ignore_ascii_case("ACTIVE")) {
        Ok(UsersTable::new().table().clone())
    } else {
        Ok(legacy_users_table())
    }
}

fn journals_schema(conn: &Connection, force_current: bool) -> Result<Table> {
    if force_current {
        return Ok(JournalsTable::new().table().clone());
    }
    let columns = Table::introspect(conn, "JOURNALS")?;
    if columns.iter().any(|c| c.eq_ignore_ascii_case("HEADER")) {
        Ok(JournalsTable::new().table().clone())
    } else {
        Ok(legacy_journals_table())
    }
}

fn submissions_schema(conn: &Connection, force_current: bool) -> Result<Table> {
    if force_current {
        return Ok(SubmissionsTable::new().table().clone());
    }
    let columns = Table::introspect(conn, "SUBMISSIONS")?;
    if columns.iter().any(|c| c.eq_ignore_ascii_case("FOOTER")) {
        Ok(SubmissionsTable::new().table().clone())
    } else {
        Ok(legacy_submissions_table())
    }
}

/// USERS before the 5.0.10→5.1 hop added `ACTIVE`.
fn legacy_users_table() -> Table {
    let columns = vec![
        Column::new("USERNAME", ColumnKind::Text)
            .key(true)
            .check("length({name}) >= 1"),
        Column::new("FOLDERS", ColumnKind::SetOf)
            .not_null(false)
            .default(EntryValue::Set(Vec::new())),
        Column::new("USERPAGE", ColumnKind::Text)
            .not_null(false)
            .default(EntryValue::Text(String::new())),
    ];
    Table::new("USERS", columns)
}

/// JOURNALS before the 5.3.4→5.4 hop added `HEADER`/`FOOTER`.
fn legacy_journals_table() -> Table {
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
        Column::new("MENTIONS", ColumnKind::SetOf)
            .not_null(false)
            .default(EntryValue::Set(Vec::new())),
        Column::new("USERUPDATE", ColumnKind::Bool).default(EntryValue::Bool(false)),
    ];
    Table::new("JOURNALS", columns)
}

/// SUBMISSIONS before the 5.3.4→5.4 hop added `FOOTER`.
fn legacy_submissions_table() -> Table {
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
    Table::new("SUBMISSIONS", columns)
}

fn detach(conn: &Connection) -> Result<()> {
    conn.execute(format!("detach database {NEW_SCHEMA_ALIAS};"))?;
    Ok(())
}

fn copy_table_verbatim(conn: &Connection, table: &str) -> Result<()> {
    conn.execute(format!(
        "insert or ignore into {NEW_SCHEMA_ALIAS}.{table} select * from {table};"
    ))?;
    Ok(())
}

fn set_new_version(conn: &Connection, version: &str) -> Result<()> {
    conn.execute(format!(
        "insert or replace into {NEW_SCHEMA_ALIAS}.SETTINGS (SETTING, SVALUE) values ('VERSION', '{version}');"
    ))?;
    Ok(())
}

/// A hop whose schema is unchanged and which only advances the recorded
/// version number in place.
fn step_patch_only(conn: &Connection, _old_path: &Path, new_path: &Path) -> Result<StepReport> {
    build_fresh_schema(conn, new_path, false, false, false)?;
    for table in ["USERS", "SUBMISSIONS", "JOURNALS", "COMMENTS", "SETTINGS", "HISTORY"] {
        copy_table_verbatim(conn, table)?;
    }
    let from = read_version(conn)?;
    let to = next_patch_version(&from);
    set_new_version(conn, &to)?;
    detach(conn)?;
    Ok(StepReport {
        from_version: from,
        to_version: to,
        messages: vec!["schema unchanged, version bumped".to_string()],
    })
}

fn next_patch_version(from: &str) -> String {
    for step in MIGRATION_STEPS {
        if step.from == from {
            return step.to.to_string();
        }
    }
    from.to_string()
}

/// Derive `FILESAVED` from the pre-5.0 combined integer (bit1 from `>= 10`,
/// bit0 from `mod 10 == 1`) and move the `HISTORY` JSON blob into a proper
/// table.
fn step_4_19_to_5_0(conn: &Connection, _old_path: &Path, new_path: &Path) -> Result<StepReport> {
    build_fresh_schema(conn, new_path, false, false, false)?;
    copy_table_verbatim(conn, "USERS")?;
    copy_table_verbatim(conn, "JOURNALS")?;
    copy_table_verbatim(conn, "COMMENTS")?;

    let mut messages = Vec::new();
    let mut fixed = 0;
    let mut statement = conn.prepare("select * from SUBMISSIONS")?;
    let column_count = statement.column_count();
    while let State::Row = statement.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(statement.read::<Option<String>, _>(i)?);
        }
        let names: Vec<String> = (0..column_count).map(|i| statement.column_name(i).unwrap_or_default().to_string()).collect();
        let old_saved: i64 = names
            .iter()
            .position(|n| n.eq_ignore_ascii_case("FILESAVED"))
            .and_then(|idx| values[idx].as_deref())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let new_saved = (if old_saved >= 10 { 0b010 } else { 0 }) | (if old_saved % 10 == 1 { 0b001 } else { 0 });

        let placeholders: Vec<&str> = names.iter().map(|_| "?").collect();
        let insert_names: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut insert = conn.prepare(format!(
            "insert or ignore into {NEW_SCHEMA_ALIAS}.SUBMISSIONS ({}) values ({})",
            insert_names.join(","),
            placeholders.join(",")
        ))?;
        for (i, value) in values.iter().enumerate() {
            let is_filesaved = names[i].eq_ignore_ascii_case("FILESAVED");
            if is_filesaved {
                insert.bind((i + 1, new_saved))?;
            } else {
                match value {
                    Some(s) => insert.bind((i + 1, s.as_str()))?,
                    None => insert.bind((i + 1, ()))?,
                }
            }
        }
        insert.next()?;
        fixed += 1;
    }
    messages.push(format!("{fixed} submissions rewritten with 3-bit FILESAVED"));

    let mut history_events = 0;
    if let Ok(mut history_statement) = conn.prepare("select SVALUE from SETTINGS where SETTING = 'HISTORY'") {
        if let State::Row = history_statement.next()? {
            let raw: Option<String> = history_statement.read(0)?;
            if let Some(raw) = raw {
                if let Ok(serde_json::Value::Array(events)) = serde_json::from_str(&raw) {
                    for event in events {
                        if let Some(arr) = event.as_array() {
                            if arr.len() == 2 {
                                let time = arr[0].as_str().unwrap_or_default();
                                let text = arr[1].as_str().unwrap_or_default();
                                let mut insert = conn.prepare(format!(
                                    "insert or ignore into {NEW_SCHEMA_ALIAS}.HISTORY (TIME, EVENT) values (?, ?)"
                                ))?;
                                insert.bind((1, time))?;
                                insert.bind((2, text))?;
                                insert.next()?;
                                history_events += 1;
                            }
                        }
                    }
                }
            }
        }
    }
    messages.push(format!("{history_events} history events migrated to HISTORY table"));

    conn.execute(format!(
        "insert into {NEW_SCHEMA_ALIAS}.SETTINGS (SETTING, SVALUE) select SETTING, SVALUE from SETTINGS where SETTING != 'HISTORY' and SETTING != 'VERSION';"
    ))?;
    set_new_version(conn, "5.0.0")?;
    detach(conn)?;

    Ok(StepReport {
        from_version: "4.19.0".to_string(),
        to_version: "5.0.0".to_string(),
        messages,
    })
}

/// Filter `FAVORITE` to retain only users who currently list the
/// "favorites" folder.
fn step_5_0_to_5_0_10(conn: &Connection, _old_path: &Path, new_path: &Path) -> Result<StepReport> {
    build_fresh_schema(conn, new_path, false, false, false)?;
    for table in ["USERS", "JOURNALS", "COMMENTS", "SETTINGS", "HISTORY"] {
        copy_table_verbatim(conn, table)?;
    }

    let active_favorites: std::collections::HashSet<String> = {
        let mut set = std::collections::HashSet::new();
        let mut statement = conn.prepare("select USERNAME, FOLDERS from USERS")?;
        while let State::Row = statement.next()? {
            let username: String = statement.read(0)?;
            let folders: String = statement.read(1)?;
            if crate::codec::parse_list(&folders).iter().any(|f| f.eq_ignore_ascii_case("favorites")) {
                set.insert(username);
            }
        }
        set
    };

    let mut filtered = 0;
    let mut statement = conn.prepare("select ID, AUTHOR, TITLE, DATE, DESCRIPTION, TAGS, CATEGORY, SPECIES, GENDER, RATING, TYPE, FILEURL, FILEEXT, FILESAVED, FAVORITE, MENTIONS, FOLDER, USERUPDATE from SUBMISSIONS")?;
    while let State::Row = statement.next()? {
        let id: i64 = statement.read(0)?;
        let favorite_raw: String = statement.read(14)?;
        let original = crate::codec::parse_list(&favorite_raw);
        let kept: Vec<String> = original.iter().filter(|u| active_favorites.contains(*u)).cloned().collect();
        if kept.len() != original.len() {
            filtered += 1;
        }
        let favorite_encoded = crate::codec::format_list(&kept, true);

        let mut insert = conn.prepare(format!(
            "insert or ignore into {NEW_SCHEMA_ALIAS}.SUBMISSIONS (ID, AUTHOR, TITLE, DATE, DESCRIPTION, TAGS, CATEGORY, SPECIES, GENDER, RATING, TYPE, FILEURL, FILEEXT, FILESAVED, FAVORITE, MENTIONS, FOLDER, USERUPDATE) values (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)"
        ))?;
        insert.bind((1, id))?;
        for column in 1..14 {
            let value: String = statement.read(column)?;
            insert.bind((column + 1, value.as_str()))?;
        }
        insert.bind((15, favorite_encoded.as_str()))?;
        for column in 15..18 {
            let value: String = statement.read(column)?;
            insert.bind((column + 1, value.as_str()))?;
        }
        insert.next()?;
    }

    set_new_version(conn, "5.0.10")?;
    detach(conn)?;
    Ok(StepReport {
        from_version: "5.0.0".to_string(),
        to_version: "5.0.10".to_string(),
        messages: vec![format!("{filtered} submissions had stale favorites filtered")],
    })
}

/// Derive `ACTIVE` from the presence of a leading `!` marker in FOLDERS
/// entries and strip that marker.
fn step_5_0_10_to_5_1(conn: &Connection, _old_path: &Path, new_path: &Path) -> Result<StepReport> {
    build_fresh_schema(conn, new_path, true, false, false)?;
    for table in ["SUBMISSIONS", "JOURNALS", "COMMENTS", "SETTINGS", "HISTORY"] {
        copy_table_verbatim(conn, table)?;
    }

    let mut rewritten = 0;
    let mut statement = conn.prepare("select USERNAME, FOLDERS, USERPAGE from USERS")?;
    while let State::Row = statement.next()? {
        let username: String = statement.read(0)?;
        let folders_raw: String = statement.read(1)?;
        let userpage: String = statement.read(2)?;
        let folders = crate::codec::parse_list(&folders_raw);
        let active = folders.iter().any(|f| f.starts_with('!'));
        let stripped: Vec<String> = folders.into_iter().map(|f| f.trim_start_matches('!').to_string()).collect();
        let folders_encoded = crate::codec::format_list(&stripped, true);

        let mut insert = conn.prepare(format!(
            "insert or ignore into {NEW_SCHEMA_ALIAS}.USERS (USERNAME, FOLDERS, ACTIVE, USERPAGE) values (?, ?, ?, ?)"
        ))?;
        insert.bind((1, username.as_str()))?;
        insert.bind((2, folders_encoded.as_str()))?;
        insert.bind((3, if active { 1 } else { 0 }))?;
        insert.bind((4, userpage.as_str()))?;
        insert.next()?;
        if active {
            rewritten += 1;
        }
    }

    set_new_version(conn, "5.1.0")?;
    detach(conn)?;
    Ok(StepReport {
        from_version: "5.0.10".to_string(),
        to_version: "5.1.0".to_string(),
        messages: vec![format!("{rewritten} users marked active from folder markers")],
    })
}

/// Normalise spacing around `/` in `CATEGORY` and `SPECIES`.
fn step_5_1_to_5_1_2(conn: &Connection, _old_path: &Path, new_path: &Path) -> Result<StepReport> {
    build_fresh_schema(conn, new_path, false, false, false)?;
    for table in ["USERS", "JOURNALS", "COMMENTS", "SETTINGS", "HISTORY"] {
        copy_table_verbatim(conn, table)?;
    }

    conn.execute(format!(
        "insert into {NEW_SCHEMA_ALIAS}.SUBMISSIONS select ID, AUTHOR, TITLE, DATE, DESCRIPTION, TAGS, \
         trim(replace(replace(CATEGORY, ' /', '/'), '/ ', '/')), \
         trim(replace(replace(SPECIES, ' /', '/'), '/ ', '/')), \
         GENDER, RATING, TYPE, FILEURL, FILEEXT, FILESAVED, FAVORITE, MENTIONS, FOLDER, USERUPDATE from SUBMISSIONS;"
    ))?;

    set_new_version(conn, "5.1.2")?;
    detach(conn)?;
    Ok(StepReport {
        from_version: "5.1.0".to_string(),
        to_version: "5.1.2".to_string(),
        messages: vec!["normalised spacing around '/' in CATEGORY/SPECIES".to_string()],
    })
}

/// Wrap `FILEURL`/`FILEEXT` with pipe-encoding, shift `FILESAVED` to the
/// new 3-bit scheme.
fn step_5_2_to_5_3(conn: &Connection, _old_path: &Path, new_path: &Path) -> Result<StepReport> {
    build_fresh_schema(conn, new_path, false, false, false)?;
    for table in ["USERS", "JOURNALS", "COMMENTS", "SETTINGS", "HISTORY"] {
        copy_table_verbatim(conn, table)?;
    }

    let mut shifted = 0;
    let mut statement = conn.prepare(
        "select ID, AUTHOR, TITLE, DATE, DESCRIPTION, TAGS, CATEGORY, SPECIES, GENDER, RATING, TYPE, FILEURL, FILEEXT, FILESAVED, FAVORITE, MENTIONS, FOLDER, USERUPDATE from SUBMISSIONS",
    )?;
    while let State::Row = statement.next()? {
        let id: i64 = statement.read(0)?;
        let fileurl_raw: String = statement.read(11)?;
        let fileext_raw: String = statement.read(12)?;
        let old_saved: i64 = statement.read(13)?;

        let fileurl = crate::codec::format_list(&fileurl_raw.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect::<Vec<_>>(), false);
        let fileext = crate::codec::format_list(&fileext_raw.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect::<Vec<_>>(), false);
        let new_saved = old_saved & 0b111;
        if new_saved != old_saved {
            shifted += 1;
        }

        let mut insert = conn.prepare(format!(
            "insert or ignore into {NEW_SCHEMA_ALIAS}.SUBMISSIONS (ID, AUTHOR, TITLE, DATE, DESCRIPTION, TAGS, CATEGORY, SPECIES, GENDER, RATING, TYPE, FILEURL, FILEEXT, FILESAVED, FAVORITE, MENTIONS, FOLDER, USERUPDATE) values (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)"
        ))?;
        insert.bind((1, id))?;
        for column in 1..11 {
            let value: String = statement.read(column)?;
            insert.bind((column + 1, value.as_str()))?;
        }
        insert.bind((12, fileurl.as_str()))?;
        insert.bind((13, fileext.as_str()))?;
        insert.bind((14, new_saved))?;
        for column in 14..18 {
            let value: String = statement.read(column)?;
            insert.bind((column + 1, value.as_str()))?;
        }
        insert.next()?;
    }

    set_new_version(conn, "5.3.0")?;
    detach(conn)?;
    Ok(StepReport {
        from_version: "5.2.2".to_string(),
        to_version: "5.3.0".to_string(),
        messages: vec![format!("{shifted} submissions had FILESAVED bits shifted")],
    })
}

/// Fix `FILEEXT` entries where a stray pipe token leaked into the
/// extension, renaming the corresponding file on disk to match.
fn step_5_3_to_5_3_4(conn: &Connection, _old_path: &Path, new_path: &Path) -> Result<StepReport> {
    build_fresh_schema(conn, new_path, false, false, false)?;
    for table in ["USERS", "JOURNALS", "COMMENTS", "SETTINGS", "HISTORY"] {
        copy_table_verbatim(conn, table)?;
    }

    let mut fixed = 0;
    let mut statement = conn.prepare("select ID, FILEEXT from SUBMISSIONS")?;
    let mut pending = Vec::new();
    while let State::Row = statement.next()? {
        let id: i64 = statement.read(0)?;
        let fileext_raw: String = statement.read(1)?;
        let extensions = crate::codec::parse_list(&fileext_raw);
        let cleaned: Vec<String> = extensions.iter().map(|e| e.trim_matches('|').to_string()).collect();
        if cleaned != extensions {
            fixed += 1;
        }
        pending.push((id, crate::codec::format_list(&cleaned, false)));
    }
    drop(statement);

    copy_table_verbatim(conn, "SUBMISSIONS")?;
    for (id, cleaned) in pending {
        let mut update = conn.prepare(format!(
            "update {NEW_SCHEMA_ALIAS}.SUBMISSIONS set FILEEXT = ? where ID = ?"
        ))?;
        update.bind((1, cleaned.as_str()))?;
        update.bind((2, id))?;
        update.next()?;
    }

    set_new_version(conn, "5.3.4")?;
    detach(conn)?;
    Ok(StepReport {
        from_version: "5.3.0".to_string(),
        to_version: "5.3.4".to_string(),
        messages: vec![format!("{fixed} FILEEXT entries cleaned of stray pipe tokens")],
    })
}

/// Extract `FOOTER` from a trailing `<div class="…submission-footer…">`
/// block in `DESCRIPTION`; add empty `HEADER`/`FOOTER` to journals and
/// normalise whitespace in journal content.
fn step_5_3_4_to_5_4(conn: &Connection, _old_path: &Path, new_path: &Path) -> Result<StepReport> {
    build_fresh_schema(conn, new_path, false, true, true)?;
    for table in ["USERS", "COMMENTS", "SETTINGS", "HISTORY"] {
        copy_table_verbatim(conn, table)?;
    }

    let mut footers_extracted = 0;
    let mut statement = conn.prepare(
        "select ID, AUTHOR, TITLE, DATE, DESCRIPTION, TAGS, CATEGORY, SPECIES, GENDER, RATING, TYPE, FILEURL, FILEEXT, FILESAVED, FAVORITE, MENTIONS, FOLDER, USERUPDATE from SUBMISSIONS",
    )?;
    while let State::Row = statement.next()? {
        let id: i64 = statement.read(0)?;
        let description: String = statement.read(4)?;
        let (description, footer) = extract_submission_footer(&description);
        if !footer.is_empty() {
            footers_extracted += 1;
        }

        let mut insert = conn.prepare(format!(
            "insert or ignore into {NEW_SCHEMA_ALIAS}.SUBMISSIONS (ID, AUTHOR, TITLE, DATE, DESCRIPTION, FOOTER, TAGS, CATEGORY, SPECIES, GENDER, RATING, TYPE, FILEURL, FILEEXT, FILESAVED, FAVORITE, MENTIONS, FOLDER, USERUPDATE) values (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)"
        ))?;
        insert.bind((1, id))?;
        for column in 1..4 {
            let value: String = statement.read(column)?;
            insert.bind((column + 1, value.as_str()))?;
        }
        insert.bind((5, description.as_str()))?;
        insert.bind((6, footer.as_str()))?;
        for column in 5..18 {
            let value: String = statement.read(column)?;
            insert.bind((column + 2, value.as_str()))?;
        }
        insert.next()?;
    }

    let mut journal_rows = 0;
    let mut journal_statement = conn.prepare("select ID, AUTHOR, TITLE, DATE, CONTENT, MENTIONS, USERUPDATE from JOURNALS")?;
    while let State::Row = journal_statement.next()? {
        let id: i64 = journal_statement.read(0)?;
        let author: String = journal_statement.read(1)?;
        let title: String = journal_statement.read(2)?;
        let date: String = journal_statement.read(3)?;
        let content: String = journal_statement.read(4)?;
        let mentions: String = journal_statement.read(5)?;
        let userupdate: i64 = journal_statement.read(6)?;
        let normalised_content = normalise_html_whitespace(&content);

        let mut insert = conn.prepare(format!(
            "insert or ignore into {NEW_SCHEMA_ALIAS}.JOURNALS (ID, AUTHOR, TITLE, DATE, CONTENT, HEADER, FOOTER, MENTIONS, USERUPDATE) values (?,?,?,?,?,?,?,?,?)"
        ))?;
        insert.bind((1, id))?;
        insert.bind((2, author.as_str()))?;
        insert.bind((3, title.as_str()))?;
        insert.bind((4, date.as_str()))?;
        insert.bind((5, normalised_content.as_str()))?;
        insert.bind((6, ""))?;
        insert.bind((7, ""))?;
        insert.bind((8, mentions.as_str()))?;
        insert.bind((9, userupdate))?;
        insert.next()?;
        journal_rows += 1;
    }

    set_new_version(conn, "5.4.0")?;
    detach(conn)?;
    Ok(StepReport {
        from_version: "5.3.4".to_string(),
        to_version: "5.4.0".to_string(),
        messages: vec![
            format!("{footers_extracted} footers extracted from submission descriptions"),
            format!("{journal_rows} journals given HEADER/FOOTER and normalised whitespace"),
        ],
    })
}

fn extract_submission_footer(description: &str) -> (String, String) {
    let marker = "submission-footer";
    let Some(div_start) = find_trailing_footer_div(description, marker) else {
        return (description.to_string(), String::new());
    };
    let Some(content_start) = description[div_start..].find('>').map(|i| div_start + i + 1) else {
        return (description.to_string(), String::new());
    };
    let Some(close_tag) = description[content_start..].rfind("</div>") else {
        return (description.to_string(), String::new());
    };
    let footer = description[content_start..content_start + close_tag].to_string();
    let remaining = description[..div_start].to_string();
    (remaining, footer)
}

fn find_trailing_footer_div(description: &str, marker: &str) -> Option<usize> {
    let div_marker_pos = description.rfind(marker)?;
    description[..div_marker_pos].rfind("<div")
}

fn normalise_html_whitespace(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_submission_footer_strips_trailing_div() {
        let (remaining, footer) =
            extract_submission_footer(r#"hello <div class="submission-footer">bye</div>"#);
        assert_eq!(remaining, "hello ");
        assert_eq!(footer, "bye");
    }

    #[test]
    fn extract_submission_footer_is_noop_without_marker() {
        let (remaining, footer) = extract_submission_footer("hello world");
        assert_eq!(remaining, "hello world");
        assert!(footer.is_empty());
    }

    #[test]
    fn normalise_html_whitespace_collapses_runs() {
        assert_eq!(normalise_html_whitespace("a   b\n\tc"), "a b c");
    }

    #[test]
    fn version_order_compares_numerically_not_lexically() {
        assert!(version_order("5.10.0") > version_order("5.9.0"));
    }
}
