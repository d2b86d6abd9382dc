//! Export job, job status and produced output records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status message stored on a freshly created job.
pub const INITIAL_JOB_STATUS_MESSAGE: &str = "0%";

/// Status message stored when too many patients failed.
pub const FAILURE_THRESHOLD_MESSAGE: &str = "Too many patient records in the job had failures";

/// Lifecycle of an export job.
///
/// `Submitted → InProgress → {Successful, Failed, Cancelled}`. The terminal
/// states are never left again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    InProgress,
    Successful,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Successful => "SUCCESSFUL",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// Returns true once the job can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Successful | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Only jobs that have not finished may be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Submitted | JobStatus::InProgress)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(JobStatus::Submitted),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "SUCCESSFUL" => Ok(JobStatus::Successful),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Encoding of the produced files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    #[serde(rename = "application/fhir+ndjson")]
    Ndjson,
    #[serde(rename = "application/zip")]
    Zip,
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Ndjson => "application/fhir+ndjson",
            OutputFormat::Zip => "application/zip",
        }
    }

    /// File extension of a finalized output file.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Ndjson => "ndjson",
            OutputFormat::Zip => "zip",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "application/fhir+ndjson" | "application/ndjson" | "ndjson" => Ok(OutputFormat::Ndjson),
            "application/zip" | "zip" => Ok(OutputFormat::Zip),
            other => Err(format!("unsupported output format: {}", other)),
        }
    }
}

/// One export request and its execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_uuid: String,
    pub resource_types: String,
    pub output_format: OutputFormat,
    pub status: JobStatus,
    pub status_message: Option<String>,
    pub progress: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Username of the requester.
    pub user: Option<String>,
    /// Sponsor the requesting user belongs to.
    pub sponsor_id: Option<i64>,
    /// Restricts the export to a single contract.
    pub contract_number: Option<String>,
    /// Only claims updated at or after this instant are requested.
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outputs: Vec<JobOutput>,
}

impl Job {
    /// Creates a job in `SUBMITTED` status with a fresh UUID.
    pub fn new(user: Option<String>, sponsor_id: Option<i64>, output_format: OutputFormat) -> Self {
        Self {
            job_uuid: uuid::Uuid::new_v4().to_string(),
            resource_types: "ExplanationOfBenefit".to_string(),
            output_format,
            status: JobStatus::Submitted,
            status_message: Some(INITIAL_JOB_STATUS_MESSAGE.to_string()),
            progress: 0,
            created_at: Utc::now(),
            expires_at: None,
            completed_at: None,
            user,
            sponsor_id,
            contract_number: None,
            since: None,
            outputs: Vec::new(),
        }
    }

    pub fn with_contract(mut self, contract_number: impl Into<String>) -> Self {
        self.contract_number = Some(contract_number.into());
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }
}

/// A finalized file registered against a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutput {
    /// File name relative to the job-scoped directory.
    pub file_path: String,
    pub resource_type: String,
    /// True for the error-record file.
    pub error: bool,
    /// Hex-encoded SHA-256 of the file contents.
    pub checksum: String,
    pub file_length: u64,
    pub downloaded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            JobStatus::Submitted,
            JobStatus::InProgress,
            JobStatus::Successful,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Submitted.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::Successful.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::InProgress.is_cancellable());
        assert!(!JobStatus::Failed.is_cancellable());
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(
            "application/fhir+ndjson".parse::<OutputFormat>().unwrap(),
            OutputFormat::Ndjson
        );
        assert_eq!("zip".parse::<OutputFormat>().unwrap(), OutputFormat::Zip);
        assert!("text/csv".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Zip.extension(), "zip");
    }

    #[test]
    fn test_new_job_defaults() {
        let job = Job::new(Some("alice".to_string()), Some(1), OutputFormat::Ndjson)
            .with_contract("Z0001");
        assert_eq!(job.status, JobStatus::Submitted);
        assert_eq!(job.status_message.as_deref(), Some("0%"));
        assert_eq!(job.contract_number.as_deref(), Some("Z0001"));
        assert!(job.expires_at.is_none());
        assert!(!job.job_uuid.is_empty());
    }
}
