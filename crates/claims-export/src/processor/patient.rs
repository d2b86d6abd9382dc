//! Retrieval and transformation of one patient's claims.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use super::error::PatientError;
use crate::client::{ClaimsClient, ClientError};
use crate::error::PoolError;
use crate::events::{BeneficiarySearchEvent, EventSink, LoggableEvent};
use crate::fhir::{eob, error_line, RecordError};
use crate::model::PatientRef;
use crate::worker::pool::{Completions, TaskPool};
use crate::writer::StreamWriter;

/// Everything a patient task needs to know about its job and contract.
#[derive(Debug, Clone)]
pub struct PatientRequest {
    pub job_uuid: String,
    pub user: Option<String>,
    pub contract_number: String,
    /// Claims before this instant are excluded; with no attestation nothing
    /// is exported.
    pub attested_on: Option<DateTime<Utc>>,
    pub since: Option<DateTime<Utc>>,
    pub patient: PatientRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientSummary {
    pub patient_id: String,
    pub records_written: usize,
    /// Records replaced by an error record.
    pub record_errors: usize,
}

impl PatientSummary {
    fn new(patient_id: &str) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            ..Self::default()
        }
    }

    pub fn has_failures(&self) -> bool {
        self.record_errors > 0
    }
}

pub type PatientResult = Result<PatientSummary, PatientError>;

/// Submits patients to the shared pool, partitioned by contract.
#[derive(Clone)]
pub struct PatientClaimsProcessor {
    pool: Arc<TaskPool>,
    client: Arc<dyn ClaimsClient>,
    events: Arc<dyn EventSink>,
}

impl PatientClaimsProcessor {
    pub fn new(
        pool: Arc<TaskPool>,
        client: Arc<dyn ClaimsClient>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            pool,
            client,
            events,
        }
    }

    /// Queues the patient under its contract; the result arrives on
    /// `completions`.
    pub fn process(
        &self,
        request: PatientRequest,
        writer: Arc<StreamWriter>,
        completions: &mut Completions<PatientResult>,
    ) -> Result<(), PoolError> {
        let client = Arc::clone(&self.client);
        let events = Arc::clone(&self.events);
        let partition = request.contract_number.clone();
        self.pool.submit_to(&partition, completions, move || {
            process_patient(client.as_ref(), events.as_ref(), &request, &writer)
        })
    }
}

/// Fetches every page for the patient and writes each surviving record as
/// one NDJSON line. A record that cannot be transformed is replaced by an
/// error record; a failed fetch writes an error record and is returned as
/// [`PatientError::Fetch`].
pub fn process_patient(
    client: &dyn ClaimsClient,
    events: &dyn EventSink,
    request: &PatientRequest,
    writer: &StreamWriter,
) -> PatientResult {
    let patient_id = request.patient.patient_id.as_str();
    let _span = tracing::debug_span!("patient", patient_id = %patient_id).entered();

    let request_start = Utc::now();
    let fetched = fetch_all(client, patient_id, request.since);
    events.send(LoggableEvent::BeneficiarySearch(BeneficiarySearchEvent {
        time_of_event: Utc::now(),
        user: request.user.clone(),
        job_uuid: request.job_uuid.clone(),
        contract_number: request.contract_number.clone(),
        request_start,
        request_end: Utc::now(),
        patient_id: patient_id.to_string(),
        response: match &fetched {
            Ok(_) => "200".to_string(),
            Err(e) => e.to_string(),
        },
    }));

    let resources = match fetched {
        Ok(resources) => resources,
        Err(e) => {
            log::warn!("Failed to retrieve claims for patient {}: {}", patient_id, e);
            writer.append_error(&error_line(&e))?;
            return Err(PatientError::Fetch {
                patient_id: patient_id.to_string(),
                source: e,
            });
        }
    };

    let mut summary = PatientSummary::new(patient_id);
    let attested_on = match request.attested_on {
        Some(attested_on) => attested_on.date_naive(),
        None => return Ok(summary),
    };

    for resource in resources.iter().filter(|r| eob::is_eob(r)) {
        match transform(resource, &request.patient, attested_on) {
            Ok(Some(line)) => {
                writer.append(line.as_bytes())?;
                summary.records_written += 1;
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("Skipping claim for patient {}: {}", patient_id, e);
                writer.append_error(&error_line(&e))?;
                summary.record_errors += 1;
            }
        }
    }

    log::debug!(
        "Wrote {} of {} resources for patient {}",
        summary.records_written,
        resources.len(),
        patient_id
    );
    Ok(summary)
}

fn fetch_all(
    client: &dyn ClaimsClient,
    patient_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<Value>, ClientError> {
    let mut bundle = client.fetch_first_page(patient_id, since)?;
    let mut resources = Vec::new();
    loop {
        resources.extend(
            std::mem::take(&mut bundle.entry)
                .into_iter()
                .filter_map(|entry| entry.resource),
        );
        if bundle.next_link().is_none() {
            return Ok(resources);
        }
        bundle = client.fetch_next_page(&bundle)?;
    }
}

/// Filters, trims and serializes one claim. `None` means the claim is not
/// exported.
fn transform(
    resource: &Value,
    patient: &PatientRef,
    attested_on: NaiveDate,
) -> Result<Option<String>, RecordError> {
    if !eob::is_eligible(resource, patient, attested_on)? {
        return Ok(None);
    }
    let trimmed = eob::trim(resource)?;
    if eob::is_part_d(&trimmed) {
        return Ok(None);
    }
    let mut line = serde_json::to_string(&trimmed).map_err(|e| RecordError::Serialize {
        id: eob::resource_id(resource),
        source: e,
    })?;
    line.push('\n');
    Ok(Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhir::Bundle;
    use crate::model::DateRange;
    use crate::writer::WriterSettings;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Events(Mutex<Vec<LoggableEvent>>);

    impl EventSink for Events {
        fn send(&self, event: LoggableEvent) {
            self.0.lock().push(event);
        }
    }

    /// Serves `pages` in order, each page linking to the next.
    struct Paged {
        pages: Vec<Vec<Value>>,
    }

    impl Paged {
        fn page(&self, index: usize) -> Bundle {
            let bundle = Bundle::new(self.pages[index].clone());
            if index + 1 < self.pages.len() {
                bundle.with_next(format!("page:{}", index + 1))
            } else {
                bundle
            }
        }
    }

    impl ClaimsClient for Paged {
        fn fetch_first_page(
            &self,
            _patient_id: &str,
            _since: Option<DateTime<Utc>>,
        ) -> Result<Bundle, ClientError> {
            Ok(self.page(0))
        }

        fn fetch_next_page(&self, bundle: &Bundle) -> Result<Bundle, ClientError> {
            let next = bundle.next_link().ok_or(ClientError::NoNextPage)?;
            let index: usize = next.trim_start_matches("page:").parse().unwrap();
            Ok(self.page(index))
        }
    }

    struct Down;

    impl ClaimsClient for Down {
        fn fetch_first_page(
            &self,
            _patient_id: &str,
            _since: Option<DateTime<Utc>>,
        ) -> Result<Bundle, ClientError> {
            Err(ClientError::Status {
                url: "http://bfd/ExplanationOfBenefit".to_string(),
                status: 500,
                body: "upstream exploded".to_string(),
            })
        }

        fn fetch_next_page(&self, _bundle: &Bundle) -> Result<Bundle, ClientError> {
            Err(ClientError::NoNextPage)
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn claim(id: &str, end: &str, code: &str) -> Value {
        json!({
            "resourceType": "ExplanationOfBenefit",
            "id": id,
            "billablePeriod": {"start": end, "end": end},
            "type": {"coding": [{"code": code}]},
            "payment": {"amount": 1}
        })
    }

    fn request() -> PatientRequest {
        PatientRequest {
            job_uuid: "job-1".to_string(),
            user: None,
            contract_number: "Z0001".to_string(),
            attested_on: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
            since: None,
            patient: PatientRef::new("-1", vec![DateRange::new(d(2019, 1, 1), d(2020, 12, 31))]),
        }
    }

    fn read_all(paths: &[std::path::PathBuf]) -> String {
        paths
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap())
            .collect()
    }

    #[test]
    fn test_filters_across_pages() {
        let dir = TempDir::new().unwrap();
        let writer = StreamWriter::open(dir.path(), "Z0001", WriterSettings::default()).unwrap();
        let client = Paged {
            pages: vec![
                vec![
                    claim("keep-1", "2020-02-01", "CARRIER"),
                    claim("before-attestation", "2019-06-01", "CARRIER"),
                ],
                vec![
                    claim("part-d", "2020-03-01", "PDE"),
                    json!({"resourceType": "Patient", "id": "-1"}),
                    claim("keep-2", "2020-04-01", "INPATIENT"),
                ],
            ],
        };
        let events = Events::default();

        let summary = process_patient(&client, &events, &request(), &writer).unwrap();
        writer.close().unwrap();

        assert_eq!(summary.records_written, 2);
        assert!(!summary.has_failures());
        let content = read_all(&writer.data_files().unwrap());
        let ids: Vec<String> = content
            .lines()
            .map(|l| serde_json::from_str::<Value>(l).unwrap()["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["keep-1", "keep-2"]);
        assert!(!content.contains("payment"));
        assert!(writer.error_files().unwrap().is_empty());

        let events = events.0.lock();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], LoggableEvent::BeneficiarySearch(e) if e.response == "200"));
    }

    #[test]
    fn test_bad_record_becomes_error_record() {
        let dir = TempDir::new().unwrap();
        let writer = StreamWriter::open(dir.path(), "Z0001", WriterSettings::default()).unwrap();
        let client = Paged {
            pages: vec![vec![
                claim("bad", "not-a-date", "CARRIER"),
                claim("good", "2020-02-01", "CARRIER"),
            ]],
        };

        let summary = process_patient(&client, &Events::default(), &request(), &writer).unwrap();
        writer.close().unwrap();

        assert_eq!(summary.records_written, 1);
        assert_eq!(summary.record_errors, 1);
        let errors = read_all(&writer.error_files().unwrap());
        let outcome: Value = serde_json::from_str(errors.trim_end()).unwrap();
        assert_eq!(outcome["resourceType"], "OperationOutcome");
        assert!(outcome["issue"][0]["details"]["text"]
            .as_str()
            .unwrap()
            .contains("bad"));
    }

    #[test]
    fn test_fetch_failure_writes_error_and_fails_patient() {
        let dir = TempDir::new().unwrap();
        let writer = StreamWriter::open(dir.path(), "Z0001", WriterSettings::default()).unwrap();
        let events = Events::default();

        let result = process_patient(&Down, &events, &request(), &writer);
        writer.close().unwrap();

        assert!(matches!(result, Err(PatientError::Fetch { ref patient_id, .. }) if patient_id == "-1"));
        assert!(writer.data_files().unwrap().is_empty());
        let errors = read_all(&writer.error_files().unwrap());
        assert!(errors.contains("upstream exploded"));
        assert!(matches!(
            &events.0.lock()[0],
            LoggableEvent::BeneficiarySearch(e) if e.response.contains("HTTP 500")
        ));
    }

    #[test]
    fn test_unattested_contract_exports_nothing() {
        let dir = TempDir::new().unwrap();
        let writer = StreamWriter::open(dir.path(), "Z0001", WriterSettings::default()).unwrap();
        let client = Paged {
            pages: vec![vec![claim("a", "2020-02-01", "CARRIER")]],
        };
        let mut req = request();
        req.attested_on = None;

        let summary = process_patient(&client, &Events::default(), &req, &writer).unwrap();
        assert_eq!(summary.records_written, 0);
    }

    #[test]
    fn test_submits_through_pool() {
        let dir = TempDir::new().unwrap();
        let writer = Arc::new(
            StreamWriter::open(dir.path(), "Z0001", WriterSettings::default()).unwrap(),
        );
        let pool = Arc::new(TaskPool::new(2).unwrap());
        let processor = PatientClaimsProcessor::new(
            pool,
            Arc::new(Paged {
                pages: vec![vec![claim("a", "2020-02-01", "CARRIER")]],
            }),
            Arc::new(Events::default()),
        );

        let mut completions = Completions::new();
        processor
            .process(request(), Arc::clone(&writer), &mut completions)
            .unwrap();
        let summary = completions.wait_next().unwrap().unwrap().unwrap();
        assert_eq!(summary.records_written, 1);
        assert!(completions.wait_next().is_none());
    }
}
