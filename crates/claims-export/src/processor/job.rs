//! Drives an in-progress job through its contracts to a terminal status.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use tracing::info_span;

use super::contract::{ContractData, ContractProcessor};
use super::error::{ContractError, JobError};
use crate::error::StoreError;
use crate::events::{EventSink, LoggableEvent};
use crate::model::{Contract, Job, JobStatus, FAILURE_THRESHOLD_MESSAGE};
use crate::store::{JobStore, PatientSource, SponsorDirectory};

/// Sponsor trees deeper than this are not walked any further.
pub const MAX_SPONSOR_DEPTH: usize = 10;

const NO_RESULTS_MESSAGE: &str = "The export process has produced no results";

#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Root under which each job gets a `<job uuid>` directory.
    pub efs_mount: PathBuf,
    /// How long outputs of a successful job stay downloadable.
    pub expiration: chrono::Duration,
}

/// How the contract runs ended, before it is written back to the job.
#[derive(Debug)]
enum Completion {
    Succeeded,
    ThresholdBreached,
    Cancelled,
    Failed(String),
}

pub struct JobProcessor {
    job_store: Arc<dyn JobStore>,
    directory: Arc<dyn SponsorDirectory>,
    patients: Arc<dyn PatientSource>,
    events: Arc<dyn EventSink>,
    contracts: ContractProcessor,
    settings: JobSettings,
}

impl JobProcessor {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        directory: Arc<dyn SponsorDirectory>,
        patients: Arc<dyn PatientSource>,
        events: Arc<dyn EventSink>,
        contracts: ContractProcessor,
        settings: JobSettings,
    ) -> Self {
        Self {
            job_store,
            directory,
            patients,
            events,
            contracts,
            settings,
        }
    }

    pub fn job_directory(&self, job_uuid: &str) -> PathBuf {
        self.settings.efs_mount.join(job_uuid)
    }

    /// Runs an `IN_PROGRESS` job and stores its terminal status. Errors are
    /// returned only when the job cannot be loaded or is not in progress;
    /// every other failure ends up as a `FAILED` job.
    pub fn process(&self, job_uuid: &str) -> Result<Job, JobError> {
        let _span = info_span!("job", job_uuid = %job_uuid).entered();

        let job = self
            .job_store
            .find_by_uuid(job_uuid)
            .map_err(|e| JobError::from_store(job_uuid, e))?;
        if job.status != JobStatus::InProgress {
            return Err(JobError::UnexpectedStatus {
                job_uuid: job_uuid.to_string(),
                expected: JobStatus::InProgress.to_string(),
            });
        }

        info!("Processing job {}", job_uuid);
        let completion = self.run(&job);
        self.complete(job, completion)
    }

    fn run(&self, job: &Job) -> Completion {
        let contracts = match self.resolve_contracts(job) {
            Ok(contracts) => contracts,
            Err(e) => {
                error!("Could not resolve contracts for job {}: {}", job.job_uuid, e);
                return Completion::Failed(e.to_string());
            }
        };

        let output_dir = self.job_directory(&job.job_uuid);
        if let Err(e) = std::fs::create_dir_all(&output_dir) {
            let e = JobError::Io {
                path: output_dir,
                source: e,
            };
            error!("{}", e);
            return Completion::Failed(e.to_string());
        }

        let mut breached = false;
        let mut produced = 0usize;
        let mut no_results: Option<ContractError> = None;

        for contract in contracts {
            let patients = match self.patients.find_patients(&contract) {
                Ok(patients) => patients,
                Err(e) => return Completion::Failed(e.to_string()),
            };
            let data = ContractData {
                job_uuid: job.job_uuid.clone(),
                user: job.user.clone(),
                since: job.since,
                contract,
                patients,
            };

            match self.contracts.process(&output_dir, &data, job.output_format) {
                Ok(outcome) => {
                    for output in &outcome.outputs {
                        if let Err(e) = self.job_store.add_output(&job.job_uuid, output) {
                            return Completion::Failed(e.to_string());
                        }
                    }
                    produced += outcome.outputs.len();
                    if !outcome.is_below_failure_threshold() {
                        warn!(
                            "Contract {} breached the failure threshold ({} of {} patients failed)",
                            data.contract.contract_number,
                            outcome.progress.failure_count(),
                            outcome.progress.total_count()
                        );
                        breached = true;
                    }
                }
                Err(ContractError::Cancelled) => return Completion::Cancelled,
                Err(e @ ContractError::NoResults(_)) => {
                    warn!("{}", e);
                    no_results = Some(e);
                }
                Err(e) => {
                    error!(
                        "Contract {} of job {} failed: {}",
                        data.contract.contract_number, job.job_uuid, e
                    );
                    return Completion::Failed(e.to_string());
                }
            }
        }

        if produced == 0 {
            return Completion::Failed(
                no_results
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| NO_RESULTS_MESSAGE.to_string()),
            );
        }
        if breached {
            Completion::ThresholdBreached
        } else {
            Completion::Succeeded
        }
    }

    /// The job's named contract, or every attested contract of the job's
    /// sponsor and its descendants.
    pub fn resolve_contracts(&self, job: &Job) -> Result<Vec<Contract>, JobError> {
        let sponsor_id = job
            .sponsor_id
            .ok_or_else(|| JobError::MissingSponsor(job.job_uuid.clone()))?;
        let authorized = self.attested_contracts(sponsor_id)?;

        match &job.contract_number {
            Some(number) => {
                let contract = self
                    .directory
                    .find_contract(number)?
                    .ok_or_else(|| JobError::ContractNotFound(number.clone()))?;
                if !authorized
                    .iter()
                    .any(|c| c.contract_number == contract.contract_number)
                {
                    return Err(JobError::ContractNotAuthorized {
                        contract_number: number.clone(),
                        sponsor_id,
                    });
                }
                Ok(vec![contract])
            }
            None => Ok(authorized),
        }
    }

    /// Breadth-first walk of the sponsor tree rooted at `sponsor_id`.
    pub fn attested_contracts(&self, sponsor_id: i64) -> Result<Vec<Contract>, JobError> {
        self.directory
            .find_sponsor(sponsor_id)?
            .ok_or(StoreError::SponsorNotFound(sponsor_id))?;

        let mut queue = VecDeque::from([(sponsor_id, 0usize)]);
        let mut seen = HashSet::new();
        let mut contracts = Vec::new();

        while let Some((id, depth)) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            contracts.extend(
                self.directory
                    .find_contracts(id)?
                    .into_iter()
                    .filter(Contract::is_attested),
            );
            if depth >= MAX_SPONSOR_DEPTH {
                warn!("Sponsor {} is nested too deeply, not descending further", id);
                continue;
            }
            for child in self.directory.find_child_sponsors(id)? {
                queue.push_back((child, depth + 1));
            }
        }

        Ok(contracts)
    }

    fn complete(&self, mut job: Job, completion: Completion) -> Result<Job, JobError> {
        let job_uuid = job.job_uuid.clone();
        let now = Utc::now();

        let new_status = match completion {
            Completion::Succeeded => JobStatus::Successful,
            Completion::ThresholdBreached | Completion::Failed(_) => JobStatus::Failed,
            Completion::Cancelled => JobStatus::Cancelled,
        };

        // A cancellation may land after the last contract finished; the
        // compare-and-set keeps it.
        let won = new_status != JobStatus::Cancelled
            && self
                .job_store
                .transition_status(&job_uuid, JobStatus::InProgress, new_status)
                .map_err(|e| JobError::from_store(&job_uuid, e))?;

        if won {
            job.status = new_status;
            job.completed_at = Some(now);
            match completion {
                Completion::Succeeded => {
                    job.status_message = Some("100%".to_string());
                    job.progress = 100;
                    job.expires_at = Some(now + self.settings.expiration);
                }
                Completion::ThresholdBreached => {
                    job.status_message = Some(FAILURE_THRESHOLD_MESSAGE.to_string());
                    job.expires_at = None;
                }
                Completion::Failed(message) => {
                    job.status_message = Some(message);
                    job.expires_at = None;
                }
                Completion::Cancelled => {}
            }
            self.job_store.save(&job)?;
        } else {
            job = self
                .job_store
                .find_by_uuid(&job_uuid)
                .map_err(|e| JobError::from_store(&job_uuid, e))?;
            // A job handed back to the queue on shutdown is not finished.
            if job.status.is_terminal() {
                job.completed_at = Some(now);
                job.expires_at = None;
                self.job_store.save(&job)?;
            }
        }

        job.outputs = self.job_store.find_outputs(&job_uuid)?;

        info!("Job {} finished with status {}", job_uuid, job.status);
        self.events.send(LoggableEvent::job_status_change(
            job.user.clone(),
            &job_uuid,
            Some(JobStatus::InProgress),
            job.status,
            job.status_message.clone().unwrap_or_default(),
        ));
        Ok(job)
    }
}
