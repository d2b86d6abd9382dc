//! The export engine: per-patient tasks, per-contract runs and the job
//! state machine around them.

pub mod contract;
pub mod error;
pub mod job;
pub mod patient;
pub mod preprocessor;
pub mod progress;

pub use contract::{ContractData, ContractOutcome, ContractProcessor, ContractSettings};
pub use error::{ContractError, JobError, PatientError};
pub use job::{JobProcessor, JobSettings};
pub use patient::{PatientClaimsProcessor, PatientRequest, PatientSummary};
pub use preprocessor::JobPreProcessor;
pub use progress::ProgressTracker;
