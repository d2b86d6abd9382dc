use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::RetryPolicy;
use crate::processor::{ContractSettings, JobSettings};
use crate::writer::WriterSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Root of the job-scoped output directories.
    pub efs_mount: String,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Configured database file, or the per-user default location when a
    /// home directory is known.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .as_ref()
            .map(PathBuf::from)
            .or_else(crate::db::default_database_path)
    }

    pub fn contract_settings(&self) -> ContractSettings {
        ContractSettings {
            cancellation_check_frequency: self.job.cancellation_check_frequency,
            report_progress_db_frequency: self.job.report_progress_db_frequency,
            report_progress_log_frequency: self.job.report_progress_log_frequency,
            failure_threshold: self.job.failure_threshold,
            writer: self.stream.writer_settings(),
        }
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            efs_mount: PathBuf::from(&self.efs_mount),
            expiration: chrono::Duration::hours(self.job.expiration_hours as i64),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.upstream.retry.max_attempts,
            Duration::from_millis(self.upstream.retry.backoff_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_pool_size() -> usize {
    num_cpus::get()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_cancellation_check_frequency")]
    pub cancellation_check_frequency: usize,
    #[serde(default = "default_report_progress_db_frequency")]
    pub report_progress_db_frequency: usize,
    #[serde(default = "default_report_progress_log_frequency")]
    pub report_progress_log_frequency: usize,
    /// Percentage of failed patients at which a contract fails.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_expiration_hours")]
    pub expiration_hours: u32,
}

fn default_cancellation_check_frequency() -> usize {
    10
}

fn default_report_progress_db_frequency() -> usize {
    100
}

fn default_report_progress_log_frequency() -> usize {
    1000
}

fn default_failure_threshold() -> u32 {
    10
}

fn default_expiration_hours() -> u32 {
    24
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            cancellation_check_frequency: default_cancellation_check_frequency(),
            report_progress_db_frequency: default_report_progress_db_frequency(),
            report_progress_log_frequency: default_report_progress_log_frequency(),
            failure_threshold: default_failure_threshold(),
            expiration_hours: default_expiration_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_max_file_bytes() -> u64 {
    200 * 1024 * 1024
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl StreamConfig {
    /// Writer settings; the output format is chosen per job.
    pub fn writer_settings(&self) -> WriterSettings {
        WriterSettings {
            max_file_bytes: self.max_file_bytes,
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            ..WriterSettings::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    250
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human format.
    #[serde(default)]
    pub json: bool,
}
