pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod fhir;
pub mod logging;
pub mod model;
pub mod processor;
pub mod store;
pub mod worker;
pub mod writer;

pub use client::{ClaimsClient, ClientError, HttpClaimsClient, RetryPolicy, RetryingClaimsClient};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, ExportError, PoolError, Result, StoreError, WriterError};
pub use events::{EventSink, LogEventSink, LoggableEvent};
pub use model::{Contract, Job, JobOutput, JobStatus, OutputFormat, PatientRef, Sponsor};
pub use processor::{
    ContractProcessor, JobError, JobPreProcessor, JobProcessor, PatientClaimsProcessor,
};
pub use store::{JobStore, OptOutStore, PatientSource, SponsorDirectory, SqliteStore};
pub use worker::{TaskPool, WorkerService};
pub use writer::{StreamWriter, WriterSettings};
