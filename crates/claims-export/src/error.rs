use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("Worker error: {0}")]
    Worker(#[from] PoolError),

    #[error("Upstream error: {0}")]
    Client(#[from] crate::client::ClientError),

    #[error("Job error: {0}")]
    Job(#[from] crate::processor::JobError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Failures of the collaborator stores (jobs, contracts, opt-outs, patients).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No job with jobUuid {0} was found")]
    JobNotFound(String),

    #[error("Contract {0} was not found")]
    ContractNotFound(String),

    #[error("Sponsor {0} was not found")]
    SponsorNotFound(i64),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

/// Failures of the streaming output writer. Always fatal to the write.
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {waited:?} waiting for the lock on '{path}'")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Failed to package '{path}': {reason}")]
    Packaging { path: PathBuf, reason: String },

    #[error("Output files are only available after the writer is closed")]
    NotClosed,

    #[error("Writer for '{0}' is already closed")]
    Closed(PathBuf),
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Task pool has been shut down")]
    ShutDown,

    #[error("Task was cancelled before it produced a result")]
    Cancelled,

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),
}

pub type Result<T> = std::result::Result<T, ExportError>;
