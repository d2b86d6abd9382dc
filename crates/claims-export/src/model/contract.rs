//! Sponsors and the contracts they own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A coverage agreement under which claims may be exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: i64,
    pub contract_number: String,
    pub contract_name: String,
    /// Claims dated before attestation are never exported.
    pub attested_on: Option<DateTime<Utc>>,
    pub sponsor_id: i64,
}

impl Contract {
    pub fn is_attested(&self) -> bool {
        self.attested_on.is_some()
    }
}

/// An organization owning contracts, optionally nested under a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sponsor {
    pub id: i64,
    pub org_name: String,
    pub legal_name: String,
    pub parent_id: Option<i64>,
}
