//! Test harness for isolated job execution.
//!
//! `TestHarness` owns an in-memory database, a temporary output mount and
//! the fakes every processor needs, and wires them the way the worker
//! binary does.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;

use claims_export::client::{ClaimsClient, ClientError};
use claims_export::db::{contract_repo, patient_repo, Database};
use claims_export::events::{EventSink, LoggableEvent};
use claims_export::fhir::Bundle;
use claims_export::model::{
    Contract, DateRange, Job, JobOutput, JobStatus, OptOut, Sponsor,
};
use claims_export::processor::{
    ContractProcessor, ContractSettings, JobPreProcessor, JobProcessor, JobSettings,
    PatientClaimsProcessor,
};
use claims_export::store::{JobStore, SqliteStore};
use claims_export::worker::{TaskPool, WorkerService};
use claims_export::StoreError;

use super::builders::default_coverage;

type FetchHook = Box<dyn Fn(&str) + Send + Sync>;

/// Upstream client serving canned claims per patient.
///
/// Claims are split into pages of `page_size`; patients marked as failing
/// get a 500 response. Every first-page fetch is recorded.
pub struct FakeClaimsClient {
    claims: HashMap<String, Vec<Value>>,
    failing: HashSet<String>,
    page_size: usize,
    fetched: Mutex<Vec<String>>,
    on_fetch: Option<FetchHook>,
}

impl FakeClaimsClient {
    pub fn new() -> Self {
        Self {
            claims: HashMap::new(),
            failing: HashSet::new(),
            page_size: 10,
            fetched: Mutex::new(Vec::new()),
            on_fetch: None,
        }
    }

    pub fn with_claims(mut self, patient_id: &str, claims: Vec<Value>) -> Self {
        self.claims.insert(patient_id.to_string(), claims);
        self
    }

    pub fn failing(mut self, patient_id: &str) -> Self {
        self.failing.insert(patient_id.to_string());
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Runs `hook` with the patient id before each first-page fetch.
    pub fn on_fetch(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_fetch = Some(Box::new(hook));
        self
    }

    /// Patient ids in the order their first page was requested.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }

    fn page(&self, patient_id: &str, index: usize) -> Bundle {
        let claims = self.claims.get(patient_id).cloned().unwrap_or_default();
        let start = index * self.page_size;
        let end = (start + self.page_size).min(claims.len());
        let page = claims.get(start..end).map(<[Value]>::to_vec).unwrap_or_default();
        let bundle = Bundle::new(page);
        if end < claims.len() {
            bundle.with_next(format!("fake://{}/{}", patient_id, index + 1))
        } else {
            bundle
        }
    }
}

impl ClaimsClient for FakeClaimsClient {
    fn fetch_first_page(
        &self,
        patient_id: &str,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Bundle, ClientError> {
        self.fetched.lock().push(patient_id.to_string());
        if let Some(hook) = &self.on_fetch {
            hook(patient_id);
        }
        if self.failing.contains(patient_id) {
            return Err(ClientError::Status {
                url: format!("fake://{}", patient_id),
                status: 500,
                body: "Internal Server Error".to_string(),
            });
        }
        Ok(self.page(patient_id, 0))
    }

    fn fetch_next_page(&self, bundle: &Bundle) -> Result<Bundle, ClientError> {
        let next = bundle.next_link().ok_or(ClientError::NoNextPage)?;
        let (patient_id, index) = next
            .trim_start_matches("fake://")
            .rsplit_once('/')
            .ok_or(ClientError::NoNextPage)?;
        let index = index.parse().map_err(|_| ClientError::NoNextPage)?;
        Ok(self.page(patient_id, index))
    }
}

/// Job store that records every persisted progress value.
pub struct CountingJobStore {
    inner: SqliteStore,
    progress_updates: Mutex<Vec<u32>>,
}

impl CountingJobStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            progress_updates: Mutex::new(Vec::new()),
        }
    }

    pub fn progress_updates(&self) -> Vec<u32> {
        self.progress_updates.lock().clone()
    }
}

impl JobStore for CountingJobStore {
    fn find_by_uuid(&self, job_uuid: &str) -> Result<Job, StoreError> {
        self.inner.find_by_uuid(job_uuid)
    }

    fn save(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.save(job)
    }

    fn update_percentage_completed(&self, job_uuid: &str, percent: u32) -> Result<(), StoreError> {
        self.progress_updates.lock().push(percent);
        self.inner.update_percentage_completed(job_uuid, percent)
    }

    fn find_current_status(&self, job_uuid: &str) -> Result<JobStatus, StoreError> {
        self.inner.find_current_status(job_uuid)
    }

    fn cancel_by_uuid(&self, job_uuid: &str) -> Result<bool, StoreError> {
        self.inner.cancel_by_uuid(job_uuid)
    }

    fn transition_status(
        &self,
        job_uuid: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, StoreError> {
        self.inner.transition_status(job_uuid, from, to)
    }

    fn add_output(&self, job_uuid: &str, output: &JobOutput) -> Result<(), StoreError> {
        self.inner.add_output(job_uuid, output)
    }

    fn find_outputs(&self, job_uuid: &str) -> Result<Vec<JobOutput>, StoreError> {
        self.inner.find_outputs(job_uuid)
    }

    fn find_by_status(&self, status: JobStatus) -> Result<Vec<String>, StoreError> {
        self.inner.find_by_status(status)
    }

    fn reset_to_submitted(&self, job_uuids: &[String]) -> Result<usize, StoreError> {
        self.inner.reset_to_submitted(job_uuids)
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<LoggableEvent>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<LoggableEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingEvents {
    fn send(&self, event: LoggableEvent) {
        self.events.lock().push(event);
    }
}

/// Isolated environment for running jobs end to end.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Root under which job directories are created.
    pub efs_mount: PathBuf,
    pub store: SqliteStore,
    pub job_store: Arc<CountingJobStore>,
    pub events: Arc<RecordingEvents>,
    pub pool_size: usize,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let efs_mount = temp_dir.path().join("efs");
        std::fs::create_dir_all(&efs_mount).expect("Failed to create efs mount");

        let store = SqliteStore::new(Database::open_in_memory().expect("Failed to open database"));
        let job_store = Arc::new(CountingJobStore::new(store.clone()));

        Self {
            temp_dir,
            efs_mount,
            store,
            job_store,
            events: Arc::new(RecordingEvents::default()),
            pool_size: 2,
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn db(&self) -> &Database {
        self.store.database()
    }

    /// A scratch directory for contract-level runs.
    pub fn output_dir(&self, name: &str) -> PathBuf {
        let dir = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&dir).expect("Failed to create output dir");
        dir
    }

    pub fn add_sponsor(&self, sponsor: &Sponsor) {
        contract_repo::insert_sponsor(self.db(), sponsor).expect("Failed to insert sponsor");
    }

    pub fn add_contract(&self, contract: &Contract) {
        contract_repo::insert_contract(self.db(), contract).expect("Failed to insert contract");
    }

    /// Seeds `count` patients named `<contract>-p<i>` with default coverage.
    pub fn add_patients(&self, contract_number: &str, count: usize) -> Vec<String> {
        (1..=count)
            .map(|i| {
                let patient_id = format!("{}-p{}", contract_number, i);
                self.add_patient(contract_number, &patient_id, default_coverage());
                patient_id
            })
            .collect()
    }

    pub fn add_patient(&self, contract_number: &str, patient_id: &str, coverage: DateRange) {
        patient_repo::insert_coverage(self.db(), contract_number, patient_id, coverage)
            .expect("Failed to insert coverage");
    }

    pub fn add_opt_out(&self, patient_id: &str, effective_date: NaiveDate) {
        patient_repo::insert_opt_out(
            self.db(),
            &OptOut {
                patient_id: patient_id.to_string(),
                effective_date,
            },
        )
        .expect("Failed to insert opt-out");
    }

    pub fn submit(&self, job: &Job) -> String {
        self.store.create_job(job).expect("Failed to create job");
        job.job_uuid.clone()
    }

    pub fn job(&self, job_uuid: &str) -> Job {
        self.store.find_by_uuid(job_uuid).expect("Job not found")
    }

    pub fn job_directory(&self, job_uuid: &str) -> PathBuf {
        self.efs_mount.join(job_uuid)
    }

    pub fn pool(&self) -> Arc<TaskPool> {
        Arc::new(TaskPool::new(self.pool_size).expect("Failed to start task pool"))
    }

    pub fn contract_processor(
        &self,
        pool: Arc<TaskPool>,
        client: Arc<dyn ClaimsClient>,
        settings: ContractSettings,
    ) -> ContractProcessor {
        let events: Arc<dyn EventSink> = self.events.clone();
        ContractProcessor::new(
            self.job_store.clone(),
            Arc::new(self.store.clone()),
            PatientClaimsProcessor::new(pool, client, Arc::clone(&events)),
            events,
            settings,
        )
    }

    /// A worker service wired like the binary, on the harness store.
    pub fn service(
        &self,
        client: Arc<dyn ClaimsClient>,
        settings: ContractSettings,
    ) -> WorkerService {
        let pool = self.pool();
        let events: Arc<dyn EventSink> = self.events.clone();
        let job_store: Arc<dyn JobStore> = self.job_store.clone();

        let contracts = self.contract_processor(Arc::clone(&pool), client, settings);
        let processor = JobProcessor::new(
            Arc::clone(&job_store),
            Arc::new(self.store.clone()),
            Arc::new(self.store.clone()),
            Arc::clone(&events),
            contracts,
            JobSettings {
                efs_mount: self.efs_mount.clone(),
                expiration: chrono::Duration::hours(24),
            },
        );
        let preprocessor = JobPreProcessor::new(Arc::clone(&job_store), events);

        WorkerService::new(preprocessor, processor, job_store, pool)
            .expect("Failed to start worker service")
    }
}

/// Lines of a finalized output file.
pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .expect("Failed to read output file")
        .lines()
        .map(str::to_string)
        .collect()
}
