//! Job repository: operations on the `jobs` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{decode, Database, DatabaseError};
use crate::model::{Job, JobStatus, OutputFormat};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub job_uuid: String,
    pub resource_types: String,
    pub output_format: String,
    pub status: String,
    pub status_message: Option<String>,
    pub progress: u32,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub completed_at: Option<String>,
    pub user_account: Option<String>,
    pub sponsor_id: Option<i64>,
    pub contract_number: Option<String>,
    pub since: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_uuid: row.get("job_uuid")?,
            resource_types: row.get("resource_types")?,
            output_format: row.get("output_format")?,
            status: row.get("status")?,
            status_message: row.get("status_message")?,
            progress: row.get("progress")?,
            created_at: row.get("created_at")?,
            expires_at: row.get("expires_at")?,
            completed_at: row.get("completed_at")?,
            user_account: row.get("user_account")?,
            sponsor_id: row.get("sponsor_id")?,
            contract_number: row.get("contract_number")?,
            since: row.get("since")?,
        })
    }

    pub fn from_job(job: &Job) -> Self {
        Self {
            job_uuid: job.job_uuid.clone(),
            resource_types: job.resource_types.clone(),
            output_format: job.output_format.content_type().to_string(),
            status: job.status.as_str().to_string(),
            status_message: job.status_message.clone(),
            progress: job.progress,
            created_at: job.created_at.to_rfc3339(),
            expires_at: job.expires_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
            user_account: job.user.clone(),
            sponsor_id: job.sponsor_id,
            contract_number: job.contract_number.clone(),
            since: job.since.map(|t| t.to_rfc3339()),
        }
    }

    /// Converts the row into a [`Job`] without outputs.
    pub fn into_job(self) -> Result<Job, DatabaseError> {
        Ok(Job {
            output_format: decode(
                "output_format",
                &self.output_format,
                self.output_format.parse::<OutputFormat>(),
            )?,
            status: decode("status", &self.status, self.status.parse::<JobStatus>())?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            expires_at: parse_optional_timestamp("expires_at", self.expires_at.as_deref())?,
            completed_at: parse_optional_timestamp("completed_at", self.completed_at.as_deref())?,
            since: parse_optional_timestamp("since", self.since.as_deref())?,
            job_uuid: self.job_uuid,
            resource_types: self.resource_types,
            status_message: self.status_message,
            progress: self.progress,
            user: self.user_account,
            sponsor_id: self.sponsor_id,
            contract_number: self.contract_number,
            outputs: Vec::new(),
        })
    }
}

pub(crate) fn parse_timestamp(
    column: &'static str,
    value: &str,
) -> Result<DateTime<Utc>, DatabaseError> {
    decode(
        column,
        value,
        DateTime::parse_from_rfc3339(value).map(|t| t.with_timezone(&Utc)),
    )
}

fn parse_optional_timestamp(
    column: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    value.map(|v| parse_timestamp(column, v)).transpose()
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (job_uuid, resource_types, output_format, status, status_message,
             progress, created_at, expires_at, completed_at, user_account, sponsor_id,
             contract_number, since)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                job.job_uuid,
                job.resource_types,
                job.output_format,
                job.status,
                job.status_message,
                job.progress,
                job.created_at,
                job.expires_at,
                job.completed_at,
                job.user_account,
                job.sponsor_id,
                job.contract_number,
                job.since,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites the mutable execution fields of a job. Returns false if no
/// row matched.
pub fn update(db: &Database, job: &JobRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = ?2, status_message = ?3, progress = ?4,
             expires_at = ?5, completed_at = ?6
             WHERE job_uuid = ?1",
            params![
                job.job_uuid,
                job.status,
                job.status_message,
                job.progress,
                job.expires_at,
                job.completed_at,
            ],
        )?;
        Ok(changed > 0)
    })
}

pub fn find_by_uuid(db: &Database, job_uuid: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM jobs WHERE job_uuid = ?1",
                params![job_uuid],
                JobRow::from_row,
            )
            .optional()?)
    })
}

fn current_status(conn: &Connection, job_uuid: &str) -> Result<Option<String>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT status FROM jobs WHERE job_uuid = ?1",
            params![job_uuid],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn find_status(db: &Database, job_uuid: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| current_status(conn, job_uuid))
}

/// Stores the percentage complete, mirrored into the status message.
pub fn update_progress(db: &Database, job_uuid: &str, percent: u32) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET progress = ?2, status_message = ?3 WHERE job_uuid = ?1",
            params![job_uuid, percent, format!("{}%", percent)],
        )?;
        Ok(())
    })
}

/// Moves a job from `from` to `to` inside an exclusive transaction.
/// Returns false, leaving the row untouched, if the job is not in `from`.
pub fn transition_status(
    db: &Database,
    job_uuid: &str,
    from: &str,
    to: &str,
    status_message: Option<&str>,
) -> Result<bool, DatabaseError> {
    db.with_exclusive_tx(|tx| {
        match current_status(tx, job_uuid)? {
            Some(status) if status == from => {}
            _ => return Ok(false),
        }
        tx.execute(
            "UPDATE jobs SET status = ?2, status_message = ?3 WHERE job_uuid = ?1",
            params![job_uuid, to, status_message],
        )?;
        Ok(true)
    })
}

/// Cancels a job that has not reached a terminal status yet.
pub fn cancel(db: &Database, job_uuid: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'CANCELLED'
             WHERE job_uuid = ?1 AND status IN ('SUBMITTED', 'IN_PROGRESS')",
            params![job_uuid],
        )?;
        Ok(changed > 0)
    })
}

/// UUIDs of jobs in `status`, oldest first.
pub fn find_uuids_by_status(db: &Database, status: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT job_uuid FROM jobs WHERE status = ?1 ORDER BY created_at ASC")?;
        let rows = stmt
            .query_map(params![status], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    })
}

/// Returns in-progress jobs to `SUBMITTED` with their progress cleared.
pub fn reset_to_submitted(db: &Database, job_uuids: &[String]) -> Result<usize, DatabaseError> {
    db.with_exclusive_tx(|tx| {
        let mut reset = 0;
        for job_uuid in job_uuids {
            reset += tx.execute(
                "UPDATE jobs SET status = 'SUBMITTED', status_message = NULL, progress = 0
                 WHERE job_uuid = ?1 AND status = 'IN_PROGRESS'",
                params![job_uuid],
            )?;
        }
        Ok(reset)
    })
}
