//! Per-contract progress counters and flush cadence.

/// Counters for one contract run. Only the thread driving the run mutates it.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    job_uuid: String,
    contract_number: String,
    total_count: usize,
    processed_count: usize,
    failure_count: usize,
    opt_out_count: usize,
    /// Percentage of failed patients at which the run is considered failed.
    failure_threshold: u32,
    last_db_update_count: usize,
    last_log_update_count: usize,
}

impl ProgressTracker {
    pub fn new(
        job_uuid: &str,
        contract_number: &str,
        total_count: usize,
        failure_threshold: u32,
    ) -> Self {
        Self {
            job_uuid: job_uuid.to_string(),
            contract_number: contract_number.to_string(),
            total_count,
            processed_count: 0,
            failure_count: 0,
            opt_out_count: 0,
            failure_threshold,
            last_db_update_count: 0,
            last_log_update_count: 0,
        }
    }

    pub fn job_uuid(&self) -> &str {
        &self.job_uuid
    }

    pub fn contract_number(&self) -> &str {
        &self.contract_number
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn processed_count(&self) -> usize {
        self.processed_count
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count
    }

    pub fn opt_out_count(&self) -> usize {
        self.opt_out_count
    }

    pub fn success_count(&self) -> usize {
        self.processed_count - self.failure_count
    }

    pub fn last_db_update_count(&self) -> usize {
        self.last_db_update_count
    }

    /// Records one finished patient; `failed` also bumps the failure count.
    pub fn record_processed(&mut self, failed: bool) {
        self.processed_count += 1;
        if failed {
            self.failure_count += 1;
        }
    }

    pub fn record_opt_out(&mut self) {
        self.opt_out_count += 1;
    }

    pub fn is_time_to_update_database(&self, frequency: usize) -> bool {
        self.processed_count - self.last_db_update_count >= frequency
    }

    pub fn is_time_to_log(&self, frequency: usize) -> bool {
        self.processed_count - self.last_log_update_count >= frequency
    }

    /// Truncated `processed * 100 / total`. Marks the current count as
    /// persisted, so call it only when the value is about to be stored.
    pub fn percentage_completed(&mut self) -> u32 {
        self.last_db_update_count = self.processed_count;
        self.percentage()
    }

    fn percentage(&self) -> u32 {
        if self.total_count == 0 {
            return 100;
        }
        (self.processed_count * 100 / self.total_count) as u32
    }

    pub fn is_error_count_below_threshold(&self) -> bool {
        if self.total_count == 0 {
            return true;
        }
        ((self.failure_count * 100 / self.total_count) as u64) < self.failure_threshold as u64
    }

    /// Emits the progress line and marks the current count as logged.
    pub fn log_progress(&mut self) {
        self.last_log_update_count = self.processed_count;
        log::info!(
            "[{}] {}: {}% complete, {}/{} patients, {} failures, {} opted out",
            self.job_uuid,
            self.contract_number,
            self.percentage(),
            self.processed_count,
            self.total_count,
            self.failure_count,
            self.opt_out_count
        );
    }
}
