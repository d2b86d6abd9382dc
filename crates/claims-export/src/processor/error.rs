use std::path::PathBuf;

use thiserror::Error;

use crate::client::ClientError;
use crate::error::{PoolError, StoreError, WriterError};

/// Failure of one patient's task.
#[derive(Error, Debug)]
pub enum PatientError {
    /// Claims could not be retrieved. Counted as a failed patient.
    #[error("Failed to retrieve claims for patient {patient_id}: {source}")]
    Fetch {
        patient_id: String,
        #[source]
        source: ClientError,
    },

    /// Output could not be written. Aborts the contract run.
    #[error(transparent)]
    Writer(#[from] WriterError),
}

#[derive(Error, Debug)]
pub enum ContractError {
    #[error("Job was cancelled while it was being processed")]
    Cancelled,

    #[error("The export process has produced no results for contract {0}")]
    NoResults(String),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error("Patient task failed: {0}")]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job {0} was not found")]
    JobNotFound(String),

    #[error("Job {job_uuid} is not in {expected} status")]
    UnexpectedStatus { job_uuid: String, expected: String },

    #[error("Contract {0} was not found")]
    ContractNotFound(String),

    #[error("Contract {contract_number} is not attested for sponsor {sponsor_id}")]
    ContractNotAuthorized {
        contract_number: String,
        sponsor_id: i64,
    },

    #[error("Job {0} has no sponsor to resolve contracts from")]
    MissingSponsor(String),

    #[error("Failed to prepare output directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JobError {
    /// Store lookups that miss are reported as the job-level error.
    pub(crate) fn from_store(job_uuid: &str, e: StoreError) -> Self {
        match e {
            StoreError::JobNotFound(_) => JobError::JobNotFound(job_uuid.to_string()),
            other => JobError::Store(other),
        }
    }
}
