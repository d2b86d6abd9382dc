//! Output repository: files registered against a job.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::model::JobOutput;

fn from_row(row: &Row<'_>) -> Result<JobOutput, rusqlite::Error> {
    Ok(JobOutput {
        file_path: row.get("file_path")?,
        resource_type: row.get("resource_type")?,
        error: row.get("error")?,
        checksum: row.get("checksum")?,
        file_length: row.get::<_, i64>("file_length")?.max(0) as u64,
        downloaded: row.get("downloaded")?,
    })
}

pub fn insert(db: &Database, job_uuid: &str, output: &JobOutput) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_outputs (job_uuid, file_path, resource_type, error, checksum,
             file_length, downloaded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job_uuid,
                output.file_path,
                output.resource_type,
                output.error,
                output.checksum,
                output.file_length as i64,
                output.downloaded,
            ],
        )?;
        Ok(())
    })
}

/// Outputs of a job in registration order.
pub fn find_by_job(db: &Database, job_uuid: &str) -> Result<Vec<JobOutput>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM job_outputs WHERE job_uuid = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map(params![job_uuid], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
