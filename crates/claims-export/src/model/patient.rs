//! Patients covered by a contract and their opt-out records.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Inclusive date range during which a patient was covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// A patient to export plus the periods covered under the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRef {
    pub patient_id: String,
    pub date_ranges: Vec<DateRange>,
}

impl PatientRef {
    pub fn new(patient_id: impl Into<String>, date_ranges: Vec<DateRange>) -> Self {
        Self {
            patient_id: patient_id.into(),
            date_ranges,
        }
    }

    /// True if any coverage range contains `date`.
    pub fn covered_on(&self, date: NaiveDate) -> bool {
        self.date_ranges.iter().any(|r| r.contains(date))
    }
}

/// A patient's choice to be excluded from data sharing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptOut {
    pub patient_id: String,
    pub effective_date: NaiveDate,
}

impl OptOut {
    /// An opt-out applies once its effective date has been reached.
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.effective_date <= date
    }

    pub fn is_effective_now(&self) -> bool {
        self.is_effective_on(Utc::now().date_naive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let range = DateRange::new(d(2020, 1, 1), d(2020, 12, 31));
        assert!(range.contains(d(2020, 1, 1)));
        assert!(range.contains(d(2020, 12, 31)));
        assert!(!range.contains(d(2021, 1, 1)));
        assert!(!range.contains(d(2019, 12, 31)));
    }

    #[test]
    fn test_patient_covered_on_any_range() {
        let patient = PatientRef::new(
            "p1",
            vec![
                DateRange::new(d(2019, 1, 1), d(2019, 6, 30)),
                DateRange::new(d(2020, 1, 1), d(2020, 6, 30)),
            ],
        );
        assert!(patient.covered_on(d(2020, 3, 1)));
        assert!(!patient.covered_on(d(2019, 9, 1)));
    }

    #[test]
    fn test_opt_out_effective_date() {
        let opt_out = OptOut {
            patient_id: "p1".to_string(),
            effective_date: d(2020, 5, 1),
        };
        assert!(opt_out.is_effective_on(d(2020, 5, 1)));
        assert!(opt_out.is_effective_on(d(2021, 1, 1)));
        assert!(!opt_out.is_effective_on(d(2020, 4, 30)));
    }
}
