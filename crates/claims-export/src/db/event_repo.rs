//! Persistence of audit events, one table per event kind.

use rusqlite::params;

use super::{Database, DatabaseError};
use crate::events::LoggableEvent;

pub fn insert(db: &Database, event: &LoggableEvent) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        match event {
            LoggableEvent::JobStatusChange(e) => conn.execute(
                "INSERT INTO event_job_status_change
                 (time_of_event, user_account, job_uuid, old_status, new_status, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    e.time_of_event.to_rfc3339(),
                    e.user,
                    e.job_uuid,
                    e.old_status.map(|s| s.as_str()),
                    e.new_status.as_str(),
                    e.description,
                ],
            )?,
            LoggableEvent::File(e) => conn.execute(
                "INSERT INTO event_file
                 (time_of_event, user_account, job_uuid, file_name, file_hash, file_length)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    e.time_of_event.to_rfc3339(),
                    e.user,
                    e.job_uuid,
                    e.file_name,
                    e.file_hash,
                    e.file_length as i64,
                ],
            )?,
            LoggableEvent::BeneficiarySearch(e) => conn.execute(
                "INSERT INTO event_beneficiary_search
                 (time_of_event, user_account, job_uuid, contract_number, request_start,
                  request_end, patient_id, response)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    e.time_of_event.to_rfc3339(),
                    e.user,
                    e.job_uuid,
                    e.contract_number,
                    e.request_start.to_rfc3339(),
                    e.request_end.to_rfc3339(),
                    e.patient_id,
                    e.response,
                ],
            )?,
        };
        Ok(())
    })
}

/// Number of stored events of each kind for a job:
/// (status changes, file events, beneficiary searches).
pub fn count_for_job(db: &Database, job_uuid: &str) -> Result<(u64, u64, u64), DatabaseError> {
    db.with_conn(|conn| {
        let count = |table: &str| -> Result<u64, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE job_uuid = ?1", table),
                params![job_uuid],
                |r| r.get(0),
            )
        };
        Ok((
            count("event_job_status_change")?,
            count("event_file")?,
            count("event_beneficiary_search")?,
        ))
    })
}
