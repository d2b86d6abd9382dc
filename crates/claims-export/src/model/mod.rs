pub mod contract;
pub mod job;
pub mod patient;

pub use contract::{Contract, Sponsor};
pub use job::{
    Job, JobOutput, JobStatus, OutputFormat, FAILURE_THRESHOLD_MESSAGE,
    INITIAL_JOB_STATUS_MESSAGE,
};
pub use patient::{DateRange, OptOut, PatientRef};
