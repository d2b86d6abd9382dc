//! Audit events emitted while a job runs.
//!
//! Events are fire-and-forget: an [`EventSink`] must never fail the job, so
//! `send` has no error channel and sinks log their own failures.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::JobStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusChangeEvent {
    pub time_of_event: DateTime<Utc>,
    pub user: Option<String>,
    pub job_uuid: String,
    pub old_status: Option<JobStatus>,
    pub new_status: JobStatus,
    pub description: String,
}

/// A finalized output file registered against a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEvent {
    pub time_of_event: DateTime<Utc>,
    pub user: Option<String>,
    pub job_uuid: String,
    pub file_name: String,
    pub file_hash: String,
    pub file_length: u64,
}

/// One upstream claims lookup for a patient.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeneficiarySearchEvent {
    pub time_of_event: DateTime<Utc>,
    pub user: Option<String>,
    pub job_uuid: String,
    pub contract_number: String,
    pub request_start: DateTime<Utc>,
    pub request_end: DateTime<Utc>,
    pub patient_id: String,
    /// `"200"` on success, otherwise the error text.
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum LoggableEvent {
    JobStatusChange(JobStatusChangeEvent),
    File(FileEvent),
    BeneficiarySearch(BeneficiarySearchEvent),
}

impl LoggableEvent {
    pub fn job_status_change(
        user: Option<String>,
        job_uuid: &str,
        old_status: Option<JobStatus>,
        new_status: JobStatus,
        description: impl Into<String>,
    ) -> Self {
        LoggableEvent::JobStatusChange(JobStatusChangeEvent {
            time_of_event: Utc::now(),
            user,
            job_uuid: job_uuid.to_string(),
            old_status,
            new_status,
            description: description.into(),
        })
    }

    pub fn file(
        user: Option<String>,
        job_uuid: &str,
        file_name: &str,
        file_hash: &str,
        file_length: u64,
    ) -> Self {
        LoggableEvent::File(FileEvent {
            time_of_event: Utc::now(),
            user,
            job_uuid: job_uuid.to_string(),
            file_name: file_name.to_string(),
            file_hash: file_hash.to_string(),
            file_length,
        })
    }

    pub fn job_uuid(&self) -> &str {
        match self {
            LoggableEvent::JobStatusChange(e) => &e.job_uuid,
            LoggableEvent::File(e) => &e.job_uuid,
            LoggableEvent::BeneficiarySearch(e) => &e.job_uuid,
        }
    }
}

impl fmt::Display for LoggableEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggableEvent::JobStatusChange(e) => write!(
                f,
                "job {} status {} -> {}: {}",
                e.job_uuid,
                e.old_status.map(|s| s.as_str()).unwrap_or("NONE"),
                e.new_status,
                e.description
            ),
            LoggableEvent::File(e) => write!(
                f,
                "job {} file {} ({} bytes, sha256 {})",
                e.job_uuid, e.file_name, e.file_length, e.file_hash
            ),
            LoggableEvent::BeneficiarySearch(e) => write!(
                f,
                "job {} contract {} patient {} search -> {}",
                e.job_uuid, e.contract_number, e.patient_id, e.response
            ),
        }
    }
}

/// Destination for audit events.
pub trait EventSink: Send + Sync {
    fn send(&self, event: LoggableEvent);
}

/// Writes events to the application log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn send(&self, event: LoggableEvent) {
        log::info!(target: "claims_export::audit", "{}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_per_variant() {
        let change = LoggableEvent::job_status_change(
            None,
            "job-1",
            Some(JobStatus::Submitted),
            JobStatus::InProgress,
            "Job in progress",
        );
        assert_eq!(
            change.to_string(),
            "job job-1 status SUBMITTED -> IN_PROGRESS: Job in progress"
        );

        let file = LoggableEvent::file(None, "job-1", "Z0001_0001.ndjson", "abc", 10);
        assert_eq!(
            file.to_string(),
            "job job-1 file Z0001_0001.ndjson (10 bytes, sha256 abc)"
        );
        assert_eq!(file.job_uuid(), "job-1");
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let file = LoggableEvent::file(None, "job-1", "a", "abc", 1);
        let value = serde_json::to_value(&file).unwrap();
        assert_eq!(value["type"], "File");
        assert_eq!(value["fileHash"], "abc");
    }
}
