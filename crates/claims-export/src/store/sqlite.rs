//! SQLite-backed implementation of every store trait plus the event sink.

use crate::db::{contract_repo, event_repo, job_repo, output_repo, patient_repo, Database};
use crate::error::StoreError;
use crate::events::{EventSink, LoggableEvent};
use crate::model::{Contract, Job, JobOutput, JobStatus, OptOut, PatientRef, Sponsor};

use super::{JobStore, OptOutStore, PatientSource, SponsorDirectory};

#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Stores a freshly submitted job.
    pub fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        job_repo::insert(&self.db, &job_repo::JobRow::from_job(job))?;
        Ok(())
    }
}

impl JobStore for SqliteStore {
    fn find_by_uuid(&self, job_uuid: &str) -> Result<Job, StoreError> {
        let row = job_repo::find_by_uuid(&self.db, job_uuid)?
            .ok_or_else(|| StoreError::JobNotFound(job_uuid.to_string()))?;
        let mut job = row.into_job()?;
        job.outputs = output_repo::find_by_job(&self.db, job_uuid)?;
        Ok(job)
    }

    fn save(&self, job: &Job) -> Result<(), StoreError> {
        if job_repo::update(&self.db, &job_repo::JobRow::from_job(job))? {
            Ok(())
        } else {
            Err(StoreError::JobNotFound(job.job_uuid.clone()))
        }
    }

    fn update_percentage_completed(&self, job_uuid: &str, percent: u32) -> Result<(), StoreError> {
        job_repo::update_progress(&self.db, job_uuid, percent)?;
        Ok(())
    }

    fn find_current_status(&self, job_uuid: &str) -> Result<JobStatus, StoreError> {
        let status = job_repo::find_status(&self.db, job_uuid)?
            .ok_or_else(|| StoreError::JobNotFound(job_uuid.to_string()))?;
        let parsed = status.parse::<JobStatus>();
        Ok(crate::db::decode("status", &status, parsed)?)
    }

    fn cancel_by_uuid(&self, job_uuid: &str) -> Result<bool, StoreError> {
        Ok(job_repo::cancel(&self.db, job_uuid)?)
    }

    fn transition_status(
        &self,
        job_uuid: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, StoreError> {
        Ok(job_repo::transition_status(
            &self.db,
            job_uuid,
            from.as_str(),
            to.as_str(),
            None,
        )?)
    }

    fn add_output(&self, job_uuid: &str, output: &JobOutput) -> Result<(), StoreError> {
        output_repo::insert(&self.db, job_uuid, output)?;
        Ok(())
    }

    fn find_outputs(&self, job_uuid: &str) -> Result<Vec<JobOutput>, StoreError> {
        Ok(output_repo::find_by_job(&self.db, job_uuid)?)
    }

    fn find_by_status(&self, status: JobStatus) -> Result<Vec<String>, StoreError> {
        Ok(job_repo::find_uuids_by_status(&self.db, status.as_str())?)
    }

    fn reset_to_submitted(&self, job_uuids: &[String]) -> Result<usize, StoreError> {
        Ok(job_repo::reset_to_submitted(&self.db, job_uuids)?)
    }
}

impl OptOutStore for SqliteStore {
    fn find_by_patient_id(&self, patient_id: &str) -> Result<Vec<OptOut>, StoreError> {
        Ok(patient_repo::find_opt_outs(&self.db, patient_id)?)
    }
}

impl SponsorDirectory for SqliteStore {
    fn find_contract(&self, contract_number: &str) -> Result<Option<Contract>, StoreError> {
        Ok(contract_repo::find_contract_by_number(&self.db, contract_number)?)
    }

    fn find_sponsor(&self, sponsor_id: i64) -> Result<Option<Sponsor>, StoreError> {
        Ok(contract_repo::find_sponsor(&self.db, sponsor_id)?)
    }

    fn find_child_sponsors(&self, sponsor_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(contract_repo::find_child_sponsor_ids(&self.db, sponsor_id)?)
    }

    fn find_contracts(&self, sponsor_id: i64) -> Result<Vec<Contract>, StoreError> {
        Ok(contract_repo::find_contracts_by_sponsor(&self.db, sponsor_id)?)
    }
}

impl PatientSource for SqliteStore {
    fn find_patients(&self, contract: &Contract) -> Result<Vec<PatientRef>, StoreError> {
        Ok(patient_repo::find_by_contract(
            &self.db,
            &contract.contract_number,
        )?)
    }
}

impl EventSink for SqliteStore {
    fn send(&self, event: LoggableEvent) {
        if let Err(e) = event_repo::insert(&self.db, &event) {
            log::warn!("Failed to record event for job {}: {}", event.job_uuid(), e);
        }
    }
}
