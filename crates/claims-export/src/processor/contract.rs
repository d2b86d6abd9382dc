//! Runs every patient of one contract through the task pool and turns the
//! result into registered output files.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tracing::info_span;

use super::error::{ContractError, PatientError};
use super::patient::{PatientClaimsProcessor, PatientRequest, PatientResult};
use super::progress::ProgressTracker;
use crate::error::{PoolError, StoreError};
use crate::events::{EventSink, LoggableEvent};
use crate::fhir::EOB_RESOURCE_TYPE;
use crate::model::{Contract, JobOutput, JobStatus, OutputFormat, PatientRef};
use crate::store::{JobStore, OptOutStore};
use crate::worker::pool::Completions;
use crate::writer::{checksum, StreamWriter, WriterSettings};

#[derive(Debug, Clone)]
pub struct ContractSettings {
    /// Job status is polled after every this many submissions.
    pub cancellation_check_frequency: usize,
    /// Progress is persisted after every this many processed patients.
    pub report_progress_db_frequency: usize,
    pub report_progress_log_frequency: usize,
    /// Failed-patient percentage at which the contract fails.
    pub failure_threshold: u32,
    pub writer: WriterSettings,
}

impl Default for ContractSettings {
    fn default() -> Self {
        Self {
            cancellation_check_frequency: 10,
            report_progress_db_frequency: 100,
            report_progress_log_frequency: 1000,
            failure_threshold: 10,
            writer: WriterSettings::default(),
        }
    }
}

/// One contract's share of a job.
#[derive(Debug, Clone)]
pub struct ContractData {
    pub job_uuid: String,
    pub user: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub contract: Contract,
    pub patients: Vec<PatientRef>,
}

#[derive(Debug)]
pub struct ContractOutcome {
    pub outputs: Vec<JobOutput>,
    pub progress: ProgressTracker,
}

impl ContractOutcome {
    pub fn is_below_failure_threshold(&self) -> bool {
        self.progress.is_error_count_below_threshold()
    }
}

struct RunState {
    tracker: ProgressTracker,
    completions: Completions<PatientResult>,
    /// First error that must abort the run once in-flight tasks finish.
    fatal: Option<ContractError>,
    cancelled: bool,
}

impl RunState {
    fn abort(&mut self, e: ContractError) {
        if self.fatal.is_none() {
            self.fatal = Some(e);
        }
    }
}

pub struct ContractProcessor {
    job_store: Arc<dyn JobStore>,
    opt_outs: Arc<dyn OptOutStore>,
    patients: PatientClaimsProcessor,
    events: Arc<dyn EventSink>,
    settings: ContractSettings,
}

impl ContractProcessor {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        opt_outs: Arc<dyn OptOutStore>,
        patients: PatientClaimsProcessor,
        events: Arc<dyn EventSink>,
        settings: ContractSettings,
    ) -> Self {
        Self {
            job_store,
            opt_outs,
            patients,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> &ContractSettings {
        &self.settings
    }

    /// Exports every non-opted-out patient of the contract into
    /// `output_dir`. Fails with [`ContractError::Cancelled`] if the job is
    /// cancelled mid-run and with [`ContractError::NoResults`] if no file
    /// was produced. Submitted tasks are always awaited before returning.
    pub fn process(
        &self,
        output_dir: &Path,
        data: &ContractData,
        format: OutputFormat,
    ) -> Result<ContractOutcome, ContractError> {
        let contract_number = data.contract.contract_number.as_str();
        let _span = info_span!("contract", job_uuid = %data.job_uuid, contract = %contract_number)
            .entered();
        info!(
            "Processing {} patients of contract {}",
            data.patients.len(),
            contract_number
        );

        let writer = Arc::new(StreamWriter::open(
            output_dir,
            contract_number,
            WriterSettings {
                format,
                ..self.settings.writer.clone()
            },
        )?);

        let mut state = RunState {
            tracker: ProgressTracker::new(
                &data.job_uuid,
                contract_number,
                data.patients.len(),
                self.settings.failure_threshold,
            ),
            completions: Completions::new(),
            fatal: None,
            cancelled: false,
        };

        self.submit_patients(data, &writer, &mut state);

        // In-flight tasks are never interrupted; they may be mid-write.
        while let Some(result) = state.completions.wait_next() {
            self.record_result(&mut state, result);
        }

        if state.cancelled {
            close_quietly(&writer);
            return Err(ContractError::Cancelled);
        }
        if let Some(e) = state.fatal.take() {
            close_quietly(&writer);
            return Err(e);
        }

        let tracker = &mut state.tracker;
        if tracker.processed_count() > tracker.last_db_update_count() {
            let percent = tracker.percentage_completed();
            self.job_store
                .update_percentage_completed(&data.job_uuid, percent)?;
        }
        tracker.log_progress();

        writer.close()?;
        let outputs = self.register_outputs(data, &writer)?;
        if outputs.is_empty() {
            return Err(ContractError::NoResults(contract_number.to_string()));
        }

        Ok(ContractOutcome {
            outputs,
            progress: state.tracker,
        })
    }

    fn submit_patients(&self, data: &ContractData, writer: &Arc<StreamWriter>, state: &mut RunState) {
        let check_frequency = self.settings.cancellation_check_frequency.max(1);
        let mut submitted = 0usize;

        for patient in &data.patients {
            match self.is_opted_out(&patient.patient_id) {
                Ok(true) => {
                    state.tracker.record_opt_out();
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    state.abort(e.into());
                    return;
                }
            }

            let request = PatientRequest {
                job_uuid: data.job_uuid.clone(),
                user: data.user.clone(),
                contract_number: data.contract.contract_number.clone(),
                attested_on: data.contract.attested_on,
                since: data.since,
                patient: patient.clone(),
            };
            if let Err(e) = self
                .patients
                .process(request, Arc::clone(writer), &mut state.completions)
            {
                state.abort(e.into());
                return;
            }
            submitted += 1;

            if submitted % check_frequency == 0 && self.stop_if_cancelled(data, submitted, state) {
                return;
            }

            while let Some(result) = state.completions.poll() {
                self.record_result(state, result);
            }
            if state.fatal.is_some() {
                return;
            }
        }

        // Runs shorter than the check frequency still get one look.
        if submitted % check_frequency != 0 {
            self.stop_if_cancelled(data, submitted, state);
        }
    }

    /// Polls the job status; returns true if submission must stop.
    fn stop_if_cancelled(&self, data: &ContractData, submitted: usize, state: &mut RunState) -> bool {
        match self.job_store.find_current_status(&data.job_uuid) {
            Ok(JobStatus::Cancelled) => {
                warn!(
                    "Job {} was cancelled, stopping contract {} after {} submissions",
                    data.job_uuid, data.contract.contract_number, submitted
                );
                state.cancelled = true;
                true
            }
            Ok(_) => false,
            Err(e) => {
                state.abort(e.into());
                true
            }
        }
    }

    fn is_opted_out(&self, patient_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .opt_outs
            .find_by_patient_id(patient_id)?
            .iter()
            .any(|opt_out| opt_out.is_effective_now()))
    }

    fn record_result(&self, state: &mut RunState, result: Result<PatientResult, PoolError>) {
        let failed = match result {
            Ok(Ok(summary)) => summary.has_failures(),
            Ok(Err(PatientError::Fetch { .. })) => true,
            Ok(Err(PatientError::Writer(e))) => {
                error!("Writing output failed: {}", e);
                state.abort(ContractError::Writer(e));
                true
            }
            Err(PoolError::Panicked(message)) => {
                error!("Patient task panicked: {}", message);
                true
            }
            Err(e) => {
                state.abort(ContractError::Pool(e));
                true
            }
        };
        state.tracker.record_processed(failed);

        let tracker = &mut state.tracker;
        if !state.cancelled
            && tracker.is_time_to_update_database(self.settings.report_progress_db_frequency.max(1))
        {
            let percent = tracker.percentage_completed();
            if let Err(e) = self
                .job_store
                .update_percentage_completed(tracker.job_uuid(), percent)
            {
                state.fatal.get_or_insert(ContractError::Store(e));
            }
        }
        if tracker.is_time_to_log(self.settings.report_progress_log_frequency.max(1)) {
            tracker.log_progress();
        }
    }

    fn register_outputs(
        &self,
        data: &ContractData,
        writer: &StreamWriter,
    ) -> Result<Vec<JobOutput>, ContractError> {
        let files = writer
            .data_files()?
            .into_iter()
            .map(|path| (path, false))
            .chain(writer.error_files()?.into_iter().map(|path| (path, true)));

        let mut outputs = Vec::new();
        for (path, error) in files {
            let (digest, length) = checksum(&path)?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.events.send(LoggableEvent::file(
                data.user.clone(),
                &data.job_uuid,
                &file_name,
                &digest,
                length,
            ));
            outputs.push(JobOutput {
                file_path: file_name,
                resource_type: EOB_RESOURCE_TYPE.to_string(),
                error,
                checksum: digest,
                file_length: length,
                downloaded: false,
            });
        }
        Ok(outputs)
    }
}

fn close_quietly(writer: &StreamWriter) {
    if let Err(e) = writer.close() {
        warn!("Failed to close writer for {}: {}", writer.directory().display(), e);
    }
}
