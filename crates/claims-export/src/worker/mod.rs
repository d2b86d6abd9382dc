pub mod pool;
pub mod service;

pub use pool::{Completions, TaskHandle, TaskPool};
pub use service::{ActiveJobs, WorkerService};

