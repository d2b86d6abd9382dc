use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The directory holding the database file could not be created.
    #[error("Cannot prepare database directory '{path}': {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored job status, format or date no longer parses.
    #[error("Invalid value '{value}' in column {column}")]
    Decode { column: &'static str, value: String },
}
