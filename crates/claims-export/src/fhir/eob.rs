//! Eligibility filtering and disclosure trimming of claims records.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::PatientRef;

pub const EOB_RESOURCE_TYPE: &str = "ExplanationOfBenefit";

/// Claim type code of the excluded (prescription drug event) category.
pub const PART_D_CODE: &str = "PDE";

/// Top-level fields that may be disclosed.
const PERMITTED_FIELDS: &[&str] = &[
    "resourceType",
    "id",
    "meta",
    "identifier",
    "status",
    "type",
    "patient",
    "billablePeriod",
    "provider",
    "organization",
    "facility",
    "careTeam",
    "diagnosis",
    "procedure",
    "item",
];

/// Fields kept on each line item.
const PERMITTED_ITEM_FIELDS: &[&str] = &[
    "sequence",
    "careTeamSequence",
    "service",
    "servicedPeriod",
    "servicedDate",
    "locationAddress",
    "locationCodeableConcept",
    "quantity",
];

/// A single record could not be filtered, trimmed or serialized.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("ExplanationOfBenefit resource is not a JSON object")]
    NotAnObject,

    #[error("Invalid {field} '{value}' on ExplanationOfBenefit {id}")]
    InvalidDate {
        id: String,
        field: &'static str,
        value: String,
    },

    #[error("Failed to serialize ExplanationOfBenefit {id}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn resource_id(resource: &Value) -> String {
    resource
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

pub fn is_eob(resource: &Value) -> bool {
    resource.get("resourceType").and_then(Value::as_str) == Some(EOB_RESOURCE_TYPE)
}

/// The claim's service date: `billablePeriod.end`, else `billablePeriod.start`.
pub fn service_date(resource: &Value) -> Result<Option<NaiveDate>, RecordError> {
    let period = match resource.get("billablePeriod") {
        Some(period) => period,
        None => return Ok(None),
    };

    for field in ["end", "start"] {
        if let Some(raw) = period.get(field) {
            let text = raw.as_str().unwrap_or_default();
            return parse_fhir_date(text).map(Some).ok_or_else(|| RecordError::InvalidDate {
                id: resource_id(resource),
                field: if field == "end" {
                    "billablePeriod.end"
                } else {
                    "billablePeriod.start"
                },
                value: raw.to_string(),
            });
        }
    }

    Ok(None)
}

/// Accepts `YYYY-MM-DD` or a dateTime starting with one.
fn parse_fhir_date(text: &str) -> Option<NaiveDate> {
    let date = text.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// True if the claim's service date is on or after `attested_on` and inside
/// one of the patient's coverage ranges.
pub fn is_eligible(
    resource: &Value,
    patient: &PatientRef,
    attested_on: NaiveDate,
) -> Result<bool, RecordError> {
    Ok(match service_date(resource)? {
        Some(date) => date >= attested_on && patient.covered_on(date),
        None => false,
    })
}

/// Removes every field outside the permitted disclosure set.
pub fn trim(resource: &Value) -> Result<Value, RecordError> {
    let source = resource.as_object().ok_or(RecordError::NotAnObject)?;

    let mut trimmed = Map::new();
    for field in PERMITTED_FIELDS {
        let Some(value) = source.get(*field) else {
            continue;
        };
        let value = if *field == "item" {
            trim_items(value)
        } else {
            value.clone()
        };
        trimmed.insert((*field).to_string(), value);
    }

    Ok(Value::Object(trimmed))
}

fn trim_items(items: &Value) -> Value {
    match items.as_array() {
        Some(items) => Value::Array(
            items
                .iter()
                .map(|item| match item.as_object() {
                    Some(item) => Value::Object(
                        item.iter()
                            .filter(|(k, _)| PERMITTED_ITEM_FIELDS.contains(&k.as_str()))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    ),
                    None => item.clone(),
                })
                .collect(),
        ),
        None => items.clone(),
    }
}

/// True for prescription drug event claims, which are never exported.
pub fn is_part_d(resource: &Value) -> bool {
    resource
        .get("type")
        .and_then(|t| t.get("coding"))
        .and_then(Value::as_array)
        .is_some_and(|codings| {
            codings
                .iter()
                .any(|c| c.get("code").and_then(Value::as_str) == Some(PART_D_CODE))
        })
}
