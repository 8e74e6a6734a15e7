//! Connection lifecycle, settings-backed configuration, multi-connection
//! detection and backup for the repository store.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use sqlite::Connection;
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::tables::comments::CommentsTable;
use crate::tables::history::HistoryTable;
use crate::tables::journals::JournalsTable;
use crate::tables::settings::SettingsTable;
use crate::tables::submissions::SubmissionsTable;
use crate::tables::users::UsersTable;

/// Build-version string stamped into a fresh store's `VERSION` setting.
pub const BUILD_VERSION: &str = "5.4.0";

pub const DEFAULT_FILES_FOLDER: &str = "files";

/// Construction parameters for [`Database::open`], replacing a long
/// positional parameter list.
#[derive(Clone, Debug)]
pub struct OpenOptions {
    pub create: bool,
    pub check_connections: bool,
    pub connection_limit: usize,
    pub verify_version: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            create: true,
            check_connections: true,
            connection_limit: 0,
            verify_version: true,
        }
    }
}

/// A live handle to one repository store. Wraps exactly one
/// `sqlite::Connection`; callers needing parallel access open separate
/// handles.
pub struct Database {
    conn: Connection,
    path: PathBuf,
    committed_changes: usize,
    pub users: UsersTable,
    pub submissions: SubmissionsTable,
    pub journals: JournalsTable,
    pub comments: CommentsTable,
    pub settings: SettingsTable,
    pub history: HistoryTable,
}

impl Database {
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!(path = %path.display(), "opening database");

        if options.check_connections {
            let holders = check_connection(&path, false, options.connection_limit)?;
            if options.connection_limit > 0 && holders.len() > options.connection_limit {
                return Err(Error::MultipleConnections {
                    count: holders.len(),
                    limit: options.connection_limit,
                });
            }
        }

        if !path.exists() && !options.create {
            return Err(Error::Database(format!(
                "database file does not exist: {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let conn = Connection::open(&path)?;
        conn.execute("pragma foreign_keys = off;")?;

        let users = UsersTable::new();
        let submissions = SubmissionsTable::new();
        let journals = JournalsTable::new();
        let comments = CommentsTable::new();
        let settings = SettingsTable::new();
        let history = HistoryTable::new();

        let formatted = is_formatted(&conn)?;
        if !formatted {
            debug!("database not formatted, initialising schema");
            users.table().create(&conn)?;
            submissions.table().create(&conn)?;
            journals.table().create(&conn)?;
            comments.table().create(&conn)?;
            settings.table().create(&conn)?;
            history.table().create(&conn)?;
            settings.seed_defaults(&conn)?;
        } else if options.verify_version {
            let stored = settings.version(&conn)?;
            compare_version(&stored, BUILD_VERSION, VersionPrecision::Major)?;
        }

        let committed_changes = conn.change_count();

        Ok(Database {
            conn,
            path,
            committed_changes,
            users,
            submissions,
            journals,
            comments,
            settings,
            history,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn files_folder(&self) -> Result<PathBuf> {
        let configured = self.settings.files_folder(&self.conn)?;
        let folder = PathBuf::from(configured);
        Ok(if folder.is_absolute() {
            folder
        } else {
            self.path
                .parent()
                .map(|p| p.join(&folder))
                .unwrap_or(folder)
        })
    }

    /// Thin pass-through for internal callers that need raw SQL access.
    pub fn execute(&self, sql: impl AsRef<str>) -> Result<()> {
        self.conn.execute(sql)?;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.conn.execute("commit;").or_else(|_| Ok::<(), Error>(()))?;
        self.committed_changes = self.conn.change_count();
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.conn.execute("rollback;")?;
        self.committed_changes = self.conn.change_count();
        Ok(())
    }

    pub fn is_clean(&self) -> bool {
        self.conn.change_count() == self.committed_changes
    }

    /// Run the migration engine, then re-open with version checks disabled.
    pub fn upgrade(self) -> Result<Database> {
        let path = self.path.clone();
        drop(self);
        crate::migration::upgrade(&path)?;
        Database::open(
            &path,
            OpenOptions {
                verify_version: false,
                ..OpenOptions::default()
            },
        )
    }

    /// Copy the store file to `<folder>/<stem> <mtime>.<ext>`, writing to a
    /// `.tmp` sibling first and renaming atomically on success.
    pub fn backup(&self, folder: Option<&Path>) -> Result<PathBuf> {
        let folder = match folder {
            Some(f) => f.to_path_buf(),
            None => {
                let configured = self.settings.backup_folder(&self.conn)?;
                PathBuf::from(configured)
            }
        };
        fs::create_dir_all(&folder).map_err(|e| Error::io(&folder, e))?;

        let metadata = fs::metadata(&self.path).map_err(|e| Error::io(&self.path, e))?;
        let mtime: chrono::DateTime<chrono::Local> = metadata
            .modified()
            .map_err(|e| Error::io(&self.path, e))?
            .into();
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("db");
        let ext = self
            .path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("db");
        let name = format!("{stem} {}.{ext}", mtime.format("%Y-%m-%d %H.%M.%S"));
        let dest = folder.join(name);
        let tmp = dest.with_extension(format!("{ext}.tmp"));

        let result = fs::copy(&self.path, &tmp).map_err(|e| Error::io(&tmp, e));
        if let Err(err) = result {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        fs::rename(&tmp, &dest).map_err(|e| Error::io(&dest, e))?;
        info!(dest = %dest.display(), "backup written");
        Ok(dest)
    }
}

fn is_formatted(conn: &Connection) -> Result<bool> {
    let mut statement = conn.prepare(
        "select name from sqlite_master where type = 'table' and name = 'SETTINGS'",
    )?;
    if matches!(statement.next()?, sqlite::State::Done) {
        return Ok(false);
    }
    let mut version_statement =
        match conn.prepare("select SVALUE from SETTINGS where SETTING = 'VERSION'") {
            Ok(s) => s,
            Err(_) => return Ok(false),
        };
    match version_statement.next()? {
        sqlite::State::Row => {
            let value: Option<String> = version_statement.read(0)?;
            Ok(value.is_some())
        }
        sqlite::State::Done => Ok(false),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum VersionPrecision {
    Major,
    Minor,
    Patch,
}

/// Split on `-` then `.`, left-align to three numeric components with
/// zero-fill, and compare lexically-numerically up to `precision`.
pub fn compare_version(a: &str, b: &str, precision: VersionPrecision) -> Result<Ordering> {
    let pa = version_parts(a).ok_or_else(|| Error::Version(format!("invalid version: {a}")))?;
    let pb = version_parts(b).ok_or_else(|| Error::Version(format!("invalid version: {b}")))?;
    let depth = match precision {
        VersionPrecision::Major => 1,
        VersionPrecision::Minor => 2,
        VersionPrecision::Patch => 3,
    };
    for i in 0..depth {
        match pa[i].cmp(&pb[i]) {
            Ordering::Equal => continue,
            other => {
                return if other != Ordering::Equal {
                    Err(Error::Version(format!(
                        "version mismatch: {a} vs {b} at precision {depth}"
                    )))
                } else {
                    Ok(other)
                }
            }
        }
    }
    Ok(Ordering::Equal)
}

fn version_parts(v: &str) -> Option<[u32; 3]> {
    let main = v.split('-').next()?;
    let mut parts = [0u32; 3];
    for (i, piece) in main.split('.').enumerate().take(3) {
        parts[i] = piece.parse().ok()?;
    }
    Some(parts)
}

/// Enumerate live processes whose command line names `path`. `sysinfo`
/// exposes no per-process open-file listing, only a process's argv, so this
/// is a command-line heuristic rather than a true open-handle scan: a
/// process that opened the file without naming it on its command line
/// (e.g. a caller that received the path over IPC) is not detected. This is
/// the accepted degraded capability for this probe; see DESIGN.md.
pub fn check_connection(path: &Path, raise_for_error: bool, limit: usize) -> Result<Vec<u32>> {
    let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut system = System::new_with_specifics(
        RefreshKind::nothing().with_processes(ProcessRefreshKind::everything()),
    );
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

    let mut holders = Vec::new();
    for (pid, process) in system.processes() {
        let names_path = process.cmd().iter().any(|arg| Path::new(arg) == canonical);
        if names_path {
            holders.push(pid.as_u32());
        }
    }

    if raise_for_error && limit > 0 && holders.len() > limit {
        warn!(count = holders.len(), limit, "too many open connections");
        return Err(Error::MultipleConnections {
            count: holders.len(),
            limit,
        });
    }
    Ok(holders)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parts_zero_fills() {
        assert_eq!(version_parts("5.3").unwrap(), [5, 3, 0]);
        assert_eq!(version_parts("5.3.4-rc1").unwrap(), [5, 3, 4]);
    }

    #[test]
    fn compare_version_equal_at_major() {
        assert_eq!(
            compare_version("5.3.4", "5.9.1", VersionPrecision::Major).unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn compare_version_rejects_mismatch_at_full_precision() {
        assert!(compare_version("5.3.4", "5.3.5", VersionPrecision::Patch).is_err());
    }

    #[test]
    fn open_creates_fresh_store_with_version_setting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repo.db");
        let db = Database::open(&path, OpenOptions::default()).unwrap();
        let version = db.settings.version(db.connection()).unwrap();
        assert_eq!(version, BUILD_VERSION);
    }
}
