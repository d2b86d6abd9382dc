//! Long-running worker: claims submitted jobs, runs them and hands
//! unfinished work back to the queue on shutdown.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use super::pool::TaskPool;
use crate::error::{PoolError, StoreError};
use crate::model::{Job, JobStatus};
use crate::processor::{JobError, JobPreProcessor, JobProcessor};
use crate::store::JobStore;

enum Bookkeeping {
    Started(String),
    Finished(String),
    Snapshot(Sender<Vec<String>>),
}

/// Set of jobs this process is running. The set lives on its own thread
/// and is only reached through messages.
pub struct ActiveJobs {
    sender: Sender<Bookkeeping>,
}

impl ActiveJobs {
    pub fn spawn() -> Result<Self, PoolError> {
        let (sender, receiver) = unbounded();
        thread::Builder::new()
            .name("active-jobs".to_string())
            .spawn(move || track_active_jobs(receiver))
            .map_err(|e| PoolError::SpawnFailed(e.to_string()))?;
        Ok(Self { sender })
    }

    pub fn started(&self, job_uuid: &str) {
        self.notify(Bookkeeping::Started(job_uuid.to_string()));
    }

    pub fn finished(&self, job_uuid: &str) {
        self.notify(Bookkeeping::Finished(job_uuid.to_string()));
    }

    /// Currently active job UUIDs, sorted.
    pub fn snapshot(&self) -> Vec<String> {
        let (reply, answer) = bounded(1);
        if self.sender.send(Bookkeeping::Snapshot(reply)).is_err() {
            return Vec::new();
        }
        answer.recv().unwrap_or_default()
    }

    fn notify(&self, message: Bookkeeping) {
        if self.sender.send(message).is_err() {
            warn!("Active job tracker is gone");
        }
    }
}

fn track_active_jobs(receiver: Receiver<Bookkeeping>) {
    let mut active = BTreeSet::new();
    for message in receiver.iter() {
        match message {
            Bookkeeping::Started(job_uuid) => {
                active.insert(job_uuid);
            }
            Bookkeeping::Finished(job_uuid) => {
                active.remove(&job_uuid);
            }
            Bookkeeping::Snapshot(reply) => {
                let _ = reply.send(active.iter().cloned().collect());
            }
        }
    }
    debug!("Active job tracker stopped");
}

pub struct WorkerService {
    preprocessor: JobPreProcessor,
    processor: JobProcessor,
    job_store: Arc<dyn JobStore>,
    pool: Arc<TaskPool>,
    active: ActiveJobs,
    shutdown: AtomicBool,
}

impl WorkerService {
    pub fn new(
        preprocessor: JobPreProcessor,
        processor: JobProcessor,
        job_store: Arc<dyn JobStore>,
        pool: Arc<TaskPool>,
    ) -> Result<Self, PoolError> {
        Ok(Self {
            preprocessor,
            processor,
            job_store,
            pool,
            active: ActiveJobs::spawn()?,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Claims the job and runs it to a terminal status.
    pub fn process(&self, job_uuid: &str) -> Result<Job, JobError> {
        self.active.started(job_uuid);
        let result = self
            .preprocessor
            .preprocess(job_uuid)
            .and_then(|_| self.processor.process(job_uuid));
        self.active.finished(job_uuid);
        result
    }

    pub fn active_jobs(&self) -> Vec<String> {
        self.active.snapshot()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Polls for submitted jobs every `poll_interval` until shutdown is
    /// requested.
    pub fn run(&self, poll_interval: Duration) -> Result<(), StoreError> {
        info!("Polling for submitted jobs every {:?}", poll_interval);
        while !self.is_shutdown() {
            for job_uuid in self.job_store.find_by_status(JobStatus::Submitted)? {
                if self.is_shutdown() {
                    break;
                }
                match self.process(&job_uuid) {
                    Ok(job) => info!("Job {} finished as {}", job.job_uuid, job.status),
                    // Another worker claimed it first.
                    Err(e @ JobError::UnexpectedStatus { .. }) => debug!("{}", e),
                    Err(e) => error!("Job {} could not be processed: {}", job_uuid, e),
                }
            }
            self.sleep(poll_interval);
        }
        Ok(())
    }

    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.is_shutdown() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(100)));
        }
    }

    /// Returns active jobs to `SUBMITTED` so another worker can pick them up.
    pub fn reset_in_progress_jobs(&self) -> usize {
        let active = self.active.snapshot();
        if active.is_empty() {
            return 0;
        }
        match self.job_store.reset_to_submitted(&active) {
            Ok(reset) => {
                info!("Reset {} in-progress jobs to SUBMITTED", reset);
                reset
            }
            Err(e) => {
                error!("Failed to reset in-progress jobs {:?}: {}", active, e);
                0
            }
        }
    }

    /// Stops polling, hands active jobs back and stops the task pool.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutdown in progress, doing housekeeping");
        self.reset_in_progress_jobs();
        self.pool.shutdown();
        self.pool.join();
        info!("Housekeeping done");
    }
}
