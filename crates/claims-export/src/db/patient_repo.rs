//! Contract patient lists and opt-out records.

use chrono::NaiveDate;
use rusqlite::params;

use super::{decode, Database, DatabaseError};
use crate::model::{DateRange, OptOut, PatientRef};

const DATE_FORMAT: &str = "%Y-%m-%d";

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(column: &'static str, value: &str) -> Result<NaiveDate, DatabaseError> {
    decode(column, value, NaiveDate::parse_from_str(value, DATE_FORMAT))
}

/// Adds one coverage period for a patient under a contract.
pub fn insert_coverage(
    db: &Database,
    contract_number: &str,
    patient_id: &str,
    range: DateRange,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO contract_patients (contract_number, patient_id, coverage_start, coverage_end)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                contract_number,
                patient_id,
                format_date(range.start),
                format_date(range.end)
            ],
        )?;
        Ok(())
    })
}

/// Patients of a contract in first-inserted order, each with all of its
/// coverage periods.
pub fn find_by_contract(
    db: &Database,
    contract_number: &str,
) -> Result<Vec<PatientRef>, DatabaseError> {
    let rows: Vec<(String, String, String)> = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT patient_id, coverage_start, coverage_end FROM contract_patients
             WHERE contract_number = ?1
             ORDER BY (SELECT MIN(p.id) FROM contract_patients p
                       WHERE p.contract_number = contract_patients.contract_number
                         AND p.patient_id = contract_patients.patient_id), id",
        )?;
        let rows = stmt
            .query_map(params![contract_number], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    let mut patients: Vec<PatientRef> = Vec::new();
    for (patient_id, start, end) in rows {
        let range = DateRange::new(
            parse_date("coverage_start", &start)?,
            parse_date("coverage_end", &end)?,
        );
        match patients.last_mut() {
            Some(last) if last.patient_id == patient_id => last.date_ranges.push(range),
            _ => patients.push(PatientRef::new(patient_id, vec![range])),
        }
    }
    Ok(patients)
}

pub fn insert_opt_out(db: &Database, opt_out: &OptOut) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO opt_outs (patient_id, effective_date) VALUES (?1, ?2)",
            params![opt_out.patient_id, format_date(opt_out.effective_date)],
        )?;
        Ok(())
    })
}

pub fn find_opt_outs(db: &Database, patient_id: &str) -> Result<Vec<OptOut>, DatabaseError> {
    let rows: Vec<String> = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT effective_date FROM opt_outs WHERE patient_id = ?1 ORDER BY effective_date",
        )?;
        let rows = stmt
            .query_map(params![patient_id], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    rows.iter()
        .map(|date| {
            Ok(OptOut {
                patient_id: patient_id.to_string(),
                effective_date: parse_date("effective_date", date)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::contract_repo;
    use crate::model::{Contract, Sponsor};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn db_with_contract() -> Database {
        let db = Database::open_in_memory().unwrap();
        contract_repo::insert_sponsor(
            &db,
            &Sponsor {
                id: 1,
                org_name: "Org".to_string(),
                legal_name: "Org".to_string(),
                parent_id: None,
            },
        )
        .unwrap();
        contract_repo::insert_contract(
            &db,
            &Contract {
                id: 1,
                contract_number: "Z0001".to_string(),
                contract_name: "Z".to_string(),
                attested_on: None,
                sponsor_id: 1,
            },
        )
        .unwrap();
        db
    }

    #[test]
    fn test_patients_grouped_in_insertion_order() {
        let db = db_with_contract();
        let year = DateRange::new(d(2020, 1, 1), d(2020, 12, 31));
        insert_coverage(&db, "Z0001", "-3", year).unwrap();
        insert_coverage(&db, "Z0001", "-1", year).unwrap();
        insert_coverage(&db, "Z0001", "-3", DateRange::new(d(2021, 1, 1), d(2021, 6, 30)))
            .unwrap();

        let patients = find_by_contract(&db, "Z0001").unwrap();
        assert_eq!(patients.len(), 2);
        assert_eq!(patients[0].patient_id, "-3");
        assert_eq!(patients[0].date_ranges.len(), 2);
        assert_eq!(patients[1].patient_id, "-1");
    }

    #[test]
    fn test_opt_outs_by_patient() {
        let db = Database::open_in_memory().unwrap();
        insert_opt_out(
            &db,
            &OptOut {
                patient_id: "-1".to_string(),
                effective_date: d(2019, 5, 1),
            },
        )
        .unwrap();

        let found = find_opt_outs(&db, "-1").unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].is_effective_now());
        assert!(find_opt_outs(&db, "-2").unwrap().is_empty());
    }
}
