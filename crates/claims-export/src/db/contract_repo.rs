//! Sponsor and contract lookups.

use rusqlite::{params, OptionalExtension, Row};

use super::job_repo::parse_timestamp;
use super::{Database, DatabaseError};
use crate::model::{Contract, Sponsor};

/// A raw contract row; `attested_on` is still text.
struct ContractRow {
    id: i64,
    contract_number: String,
    contract_name: String,
    attested_on: Option<String>,
    sponsor_id: i64,
}

impl ContractRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            contract_number: row.get("contract_number")?,
            contract_name: row.get("contract_name")?,
            attested_on: row.get("attested_on")?,
            sponsor_id: row.get("sponsor_id")?,
        })
    }

    fn into_contract(self) -> Result<Contract, DatabaseError> {
        Ok(Contract {
            id: self.id,
            attested_on: self
                .attested_on
                .as_deref()
                .map(|v| parse_timestamp("attested_on", v))
                .transpose()?,
            contract_number: self.contract_number,
            contract_name: self.contract_name,
            sponsor_id: self.sponsor_id,
        })
    }
}

fn sponsor_from_row(row: &Row<'_>) -> Result<Sponsor, rusqlite::Error> {
    Ok(Sponsor {
        id: row.get("id")?,
        org_name: row.get("org_name")?,
        legal_name: row.get("legal_name")?,
        parent_id: row.get("parent_id")?,
    })
}

pub fn insert_sponsor(db: &Database, sponsor: &Sponsor) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO sponsors (id, org_name, legal_name, parent_id) VALUES (?1, ?2, ?3, ?4)",
            params![
                sponsor.id,
                sponsor.org_name,
                sponsor.legal_name,
                sponsor.parent_id
            ],
        )?;
        Ok(())
    })
}

pub fn insert_contract(db: &Database, contract: &Contract) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO contracts (id, contract_number, contract_name, attested_on, sponsor_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                contract.id,
                contract.contract_number,
                contract.contract_name,
                contract.attested_on.map(|t| t.to_rfc3339()),
                contract.sponsor_id,
            ],
        )?;
        Ok(())
    })
}

pub fn find_sponsor(db: &Database, id: i64) -> Result<Option<Sponsor>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM sponsors WHERE id = ?1",
                params![id],
                sponsor_from_row,
            )
            .optional()?)
    })
}

/// IDs of the direct children of a sponsor.
pub fn find_child_sponsor_ids(db: &Database, parent_id: i64) -> Result<Vec<i64>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT id FROM sponsors WHERE parent_id = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![parent_id], |r| r.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    })
}

pub fn find_contract_by_number(
    db: &Database,
    contract_number: &str,
) -> Result<Option<Contract>, DatabaseError> {
    let row = db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM contracts WHERE contract_number = ?1",
                params![contract_number],
                ContractRow::from_row,
            )
            .optional()?)
    })?;
    row.map(ContractRow::into_contract).transpose()
}

/// Contracts owned directly by a sponsor, by contract number.
pub fn find_contracts_by_sponsor(
    db: &Database,
    sponsor_id: i64,
) -> Result<Vec<Contract>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM contracts WHERE sponsor_id = ?1 ORDER BY contract_number",
        )?;
        let rows = stmt
            .query_map(params![sponsor_id], ContractRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(ContractRow::into_contract).collect()
}
