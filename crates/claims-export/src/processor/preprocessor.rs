use std::sync::Arc;

use log::info;

use super::error::JobError;
use crate::events::{EventSink, LoggableEvent};
use crate::model::{Job, JobStatus};
use crate::store::JobStore;

/// Claims a submitted job for this worker.
pub struct JobPreProcessor {
    job_store: Arc<dyn JobStore>,
    events: Arc<dyn EventSink>,
}

impl JobPreProcessor {
    pub fn new(job_store: Arc<dyn JobStore>, events: Arc<dyn EventSink>) -> Self {
        Self { job_store, events }
    }

    /// Moves the job from `SUBMITTED` to `IN_PROGRESS`. Losing the race to
    /// another worker is reported like any other wrong status.
    pub fn preprocess(&self, job_uuid: &str) -> Result<Job, JobError> {
        let mut job = self
            .job_store
            .find_by_uuid(job_uuid)
            .map_err(|e| JobError::from_store(job_uuid, e))?;

        let not_submitted = || JobError::UnexpectedStatus {
            job_uuid: job_uuid.to_string(),
            expected: JobStatus::Submitted.to_string(),
        };
        if job.status != JobStatus::Submitted {
            return Err(not_submitted());
        }
        if !self
            .job_store
            .transition_status(job_uuid, JobStatus::Submitted, JobStatus::InProgress)?
        {
            return Err(not_submitted());
        }

        info!("Job {} is now in progress", job_uuid);
        self.events.send(LoggableEvent::job_status_change(
            job.user.clone(),
            job_uuid,
            Some(JobStatus::Submitted),
            JobStatus::InProgress,
            "Job in progress",
        ));

        job.status = JobStatus::InProgress;
        job.status_message = None;
        Ok(job)
    }
}
