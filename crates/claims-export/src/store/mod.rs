//! Narrow interfaces through which the export engine reads and updates
//! jobs, contracts, patients and opt-outs.

pub mod sqlite;

use crate::error::StoreError;
use crate::model::{Contract, Job, JobOutput, JobStatus, OptOut, PatientRef, Sponsor};

pub use sqlite::SqliteStore;

pub trait JobStore: Send + Sync {
    /// The job including its registered outputs.
    fn find_by_uuid(&self, job_uuid: &str) -> Result<Job, StoreError>;

    /// Persists status, message, progress and timestamps of `job`.
    fn save(&self, job: &Job) -> Result<(), StoreError>;

    fn update_percentage_completed(&self, job_uuid: &str, percent: u32) -> Result<(), StoreError>;

    fn find_current_status(&self, job_uuid: &str) -> Result<JobStatus, StoreError>;

    /// Returns false if the job had already finished.
    fn cancel_by_uuid(&self, job_uuid: &str) -> Result<bool, StoreError>;

    /// Atomically moves the job from `from` to `to`, clearing the status
    /// message. Returns false if the job was not in `from`.
    fn transition_status(
        &self,
        job_uuid: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, StoreError>;

    fn add_output(&self, job_uuid: &str, output: &JobOutput) -> Result<(), StoreError>;

    fn find_outputs(&self, job_uuid: &str) -> Result<Vec<JobOutput>, StoreError>;

    fn find_by_status(&self, status: JobStatus) -> Result<Vec<String>, StoreError>;

    /// Hands in-progress jobs back to the queue. Returns how many were reset.
    fn reset_to_submitted(&self, job_uuids: &[String]) -> Result<usize, StoreError>;
}

pub trait OptOutStore: Send + Sync {
    fn find_by_patient_id(&self, patient_id: &str) -> Result<Vec<OptOut>, StoreError>;
}

pub trait SponsorDirectory: Send + Sync {
    fn find_contract(&self, contract_number: &str) -> Result<Option<Contract>, StoreError>;

    fn find_sponsor(&self, sponsor_id: i64) -> Result<Option<Sponsor>, StoreError>;

    fn find_child_sponsors(&self, sponsor_id: i64) -> Result<Vec<i64>, StoreError>;

    /// Contracts owned directly by the sponsor, attested or not.
    fn find_contracts(&self, sponsor_id: i64) -> Result<Vec<Contract>, StoreError>;
}

pub trait PatientSource: Send + Sync {
    /// Patients covered by the contract, in processing order.
    fn find_patients(&self, contract: &Contract) -> Result<Vec<PatientRef>, StoreError>;
}
