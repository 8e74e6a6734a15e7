use std::path::PathBuf;

use thiserror::Error;

/// Closed error surface for the repository engine.
///
/// Read paths propagate these unchanged; write paths never roll back
/// implicitly — callers drive `Database::commit`/`rollback` themselves.
#[derive(Debug, Error)]
pub enum Error {
    #[error("version error: {0}")]
    Version(String),

    #[error("multiple connections to database: {count} open handles exceed limit {limit}")]
    MultipleConnections { count: usize, limit: usize },

    #[error("unknown selector operator: {0}")]
    UnknownSelector(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("key not found: {0}")]
    Key(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Sqlite(#[from] sqlite::Error),

    #[error("database error: {0}")]
    Database(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
