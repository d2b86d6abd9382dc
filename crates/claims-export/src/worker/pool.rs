use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info};
use parking_lot::Mutex;

use crate::error::PoolError;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Per-partition FIFO queues served in rotation.
///
/// Each dispatch takes one task from the partition at the front of the
/// rotation and moves that partition to the back, so a partition with a
/// long backlog cannot hold every worker while others wait.
#[derive(Default)]
struct RoundRobinQueue {
    rotation: VecDeque<String>,
    pending: HashMap<String, VecDeque<Task>>,
}

impl RoundRobinQueue {
    fn push(&mut self, partition: &str, task: Task) {
        let queue = self.pending.entry(partition.to_string()).or_default();
        if queue.is_empty() {
            self.rotation.push_back(partition.to_string());
        }
        queue.push_back(task);
    }

    fn pop(&mut self) -> Option<(String, Task)> {
        while let Some(partition) = self.rotation.pop_front() {
            let Some(queue) = self.pending.get_mut(&partition) else {
                continue;
            };
            let Some(task) = queue.pop_front() else {
                self.pending.remove(&partition);
                continue;
            };
            if queue.is_empty() {
                self.pending.remove(&partition);
            } else {
                self.rotation.push_back(partition.clone());
            }
            return Some((partition, task));
        }
        None
    }

    fn len(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    /// Drops every queued task and returns how many were dropped.
    fn clear(&mut self) -> usize {
        let dropped = self.len();
        self.rotation.clear();
        self.pending.clear();
        dropped
    }
}

/// Delivers a task's result exactly once. A task dropped before it runs
/// reports [`PoolError::Cancelled`].
struct ResultSlot<T> {
    sender: Option<Sender<Result<T, PoolError>>>,
}

impl<T> ResultSlot<T> {
    fn new(sender: Sender<Result<T, PoolError>>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    fn fill(mut self, result: Result<T, PoolError>) {
        if let Some(sender) = self.sender.take() {
            // The receiver may have been dropped; nothing left to notify.
            let _ = sender.send(result);
        }
    }

    /// Drops the slot without reporting anything.
    fn discard(mut self) {
        self.sender.take();
    }
}

impl<T> Drop for ResultSlot<T> {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Err(PoolError::Cancelled));
        }
    }
}

/// Awaitable result of a submitted task.
pub struct TaskHandle<T> {
    receiver: Receiver<Result<T, PoolError>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task has finished.
    pub fn wait(self) -> Result<T, PoolError> {
        self.receiver.recv().unwrap_or(Err(PoolError::Cancelled))
    }

    /// Returns the result if the task has finished, without blocking.
    pub fn try_wait(&self) -> Option<Result<T, PoolError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(PoolError::Cancelled)),
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, PoolError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(PoolError::Cancelled)),
        }
    }
}

/// Results of a group of tasks, gathered on one channel in completion order.
///
/// Every task submitted with [`TaskPool::submit_to`] reports exactly once,
/// so the group knows how many results are still outstanding.
pub struct Completions<T> {
    sender: Sender<Result<T, PoolError>>,
    receiver: Receiver<Result<T, PoolError>>,
    outstanding: usize,
}

impl<T> Completions<T> {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            outstanding: 0,
        }
    }

    /// Submitted tasks that have not been collected yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Returns the next finished result without blocking.
    pub fn poll(&mut self) -> Option<Result<T, PoolError>> {
        if self.outstanding == 0 {
            return None;
        }
        let result = self.receiver.try_recv().ok()?;
        self.outstanding -= 1;
        Some(result)
    }

    /// Blocks until the next task finishes. Returns `None` once every
    /// submitted task has been collected.
    pub fn wait_next(&mut self) -> Option<Result<T, PoolError>> {
        if self.outstanding == 0 {
            return None;
        }
        // We hold a sender, so the channel never disconnects.
        let result = self.receiver.recv().unwrap_or(Err(PoolError::Cancelled));
        self.outstanding -= 1;
        Some(result)
    }
}

impl<T> Default for Completions<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-size pool of worker threads executing one task per patient,
/// shared by every contract and job in the process.
pub struct TaskPool {
    queue: Arc<Mutex<RoundRobinQueue>>,
    wake_sender: Sender<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    size: usize,
}

impl TaskPool {
    /// Starts `size` worker threads.
    pub fn new(size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::SpawnFailed("pool size must be at least 1".to_string()));
        }
        let queue = Arc::new(Mutex::new(RoundRobinQueue::default()));
        let (wake_sender, wake_receiver) = unbounded::<()>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let queue = Arc::clone(&queue);
            let wake = wake_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);

            let handle = thread::Builder::new()
                .name(format!("patient-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, queue, wake, shutdown_flag))
                .map_err(|e| PoolError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        info!("Started {} patient workers", size);

        Ok(Self {
            queue,
            wake_sender,
            workers: Mutex::new(workers),
            shutdown,
            size,
        })
    }

    /// Queues `task` under `partition` and returns a handle to its result.
    pub fn submit<F, T>(&self, partition: &str, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_sender, result_receiver) = bounded::<Result<T, PoolError>>(1);
        self.enqueue(partition, task, ResultSlot::new(result_sender))?;
        Ok(TaskHandle {
            receiver: result_receiver,
        })
    }

    /// Queues `task` under `partition`; its result is delivered to
    /// `completions`.
    pub fn submit_to<F, T>(
        &self,
        partition: &str,
        completions: &mut Completions<T>,
        task: F,
    ) -> Result<(), PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(partition, task, ResultSlot::new(completions.sender.clone()))?;
        completions.outstanding += 1;
        Ok(())
    }

    fn enqueue<F, T>(&self, partition: &str, task: F, slot: ResultSlot<T>) -> Result<(), PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        {
            let mut queue = self.queue.lock();
            // Checked under the lock: `shutdown` clears the queue only after
            // setting the flag, so anything pushed here is either run or
            // reported as cancelled.
            if self.is_shutdown() {
                slot.discard();
                return Err(PoolError::ShutDown);
            }
            let wrapped: Task = Box::new(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(task))
                    .map_err(|payload| PoolError::Panicked(panic_message(payload.as_ref())));
                slot.fill(result);
            });
            queue.push(partition, wrapped);
        }

        // Workers only exit after shutdown, which cancels whatever is queued.
        if self.wake_sender.send(()).is_err() {
            debug!("No worker left to wake for {}", partition);
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of queued tasks not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Stops accepting work and cancels queued tasks. Running tasks finish.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancelled = self.queue.lock().clear();
        info!(
            "Shutting down task pool, {} queued tasks cancelled",
            cancelled
        );
    }

    /// Waits for every worker thread to exit. Call after [`TaskPool::shutdown`].
    pub fn join(&self) {
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}

fn run_worker(
    worker_id: usize,
    queue: Arc<Mutex<RoundRobinQueue>>,
    wake: Receiver<()>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Acquire) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match wake.recv_timeout(Duration::from_millis(100)) {
            Ok(()) => {
                let next = queue.lock().pop();
                if let Some((partition, task)) = next {
                    debug!("Worker {} running task for {}", worker_id, partition);
                    task();
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} wake channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
