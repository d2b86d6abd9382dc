//! Builders for test data.

#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};

use claims_export::model::{Contract, DateRange, Job, OutputFormat, Sponsor};

/// Every seeded contract is attested on this day.
pub fn attestation_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
}

/// Coverage given to seeded patients unless a test says otherwise.
pub fn default_coverage() -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2030, 12, 31).unwrap(),
    )
}

pub fn sponsor(id: i64, parent_id: Option<i64>) -> Sponsor {
    Sponsor {
        id,
        org_name: format!("Org {}", id),
        legal_name: format!("Legal Org {}", id),
        parent_id,
    }
}

/// Builder for creating `Contract` instances.
pub struct ContractBuilder {
    id: i64,
    contract_number: String,
    sponsor_id: i64,
    attested_on: Option<DateTime<Utc>>,
}

impl ContractBuilder {
    pub fn new(id: i64, contract_number: &str, sponsor_id: i64) -> Self {
        Self {
            id,
            contract_number: contract_number.to_string(),
            sponsor_id,
            attested_on: Some(attestation_date()),
        }
    }

    pub fn unattested(mut self) -> Self {
        self.attested_on = None;
        self
    }

    pub fn attested_on(mut self, at: DateTime<Utc>) -> Self {
        self.attested_on = Some(at);
        self
    }

    pub fn build(self) -> Contract {
        Contract {
            id: self.id,
            contract_name: format!("Contract {}", self.contract_number),
            contract_number: self.contract_number,
            attested_on: self.attested_on,
            sponsor_id: self.sponsor_id,
        }
    }
}

/// Builder for creating submitted `Job` instances.
pub struct JobBuilder {
    sponsor_id: Option<i64>,
    contract_number: Option<String>,
    format: OutputFormat,
    since: Option<DateTime<Utc>>,
    user: String,
}

impl JobBuilder {
    pub fn new(sponsor_id: i64) -> Self {
        Self {
            sponsor_id: Some(sponsor_id),
            contract_number: None,
            format: OutputFormat::Ndjson,
            since: None,
            user: "regularUser".to_string(),
        }
    }

    pub fn contract(mut self, contract_number: &str) -> Self {
        self.contract_number = Some(contract_number.to_string());
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn build(self) -> Job {
        let mut job = Job::new(Some(self.user), self.sponsor_id, self.format);
        if let Some(contract_number) = self.contract_number {
            job = job.with_contract(contract_number);
        }
        if let Some(since) = self.since {
            job = job.with_since(since);
        }
        job
    }
}

/// An eligible carrier claim for `patient_id` serviced on `date` (YYYY-MM-DD).
pub fn claim(id: &str, patient_id: &str, date: &str) -> Value {
    json!({
        "resourceType": "ExplanationOfBenefit",
        "id": id,
        "status": "active",
        "type": {"coding": [{
            "system": "https://bluebutton.cms.gov/resources/codesystem/eob-type",
            "code": "CARRIER"
        }]},
        "patient": {"reference": format!("Patient/{}", patient_id)},
        "billablePeriod": {"start": date, "end": date},
        "payment": {"amount": {"value": 42.0}},
        "item": [{"sequence": 1, "service": {"text": "office visit"}, "adjudication": []}]
    })
}

/// A prescription drug event claim, which is never exported.
pub fn part_d_claim(id: &str, patient_id: &str, date: &str) -> Value {
    let mut claim = claim(id, patient_id, date);
    claim["type"]["coding"][0]["code"] = json!("PDE");
    claim
}
