//! Background Module
//!
//! Threads that run work off the caller's thread.
//!
//! ## Architecture
//! - `WorkerPool`: fixed threads draining one job channel (async reads)
//! - `DelayScheduler`: one thread running jobs once their delay has passed
//!   (deferred index flushes)
//!
//! Dropping either closes its channel. Threads are joined unless the drop
//! happens on one of them, which is the case when a job held the last
//! reference to the owning database.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::error::{HdbError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

// =============================================================================
// Worker Pool
// =============================================================================

/// Fixed-size pool of threads sharing one job queue
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        let (sender, receiver) = channel::unbounded::<Job>();
        let mut handles = Vec::with_capacity(threads);

        for index in 0..threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", name, index))
                .spawn(move || {
                    for job in receiver.iter() {
                        job();
                    }
                })?;
            handles.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            handles,
        })
    }

    /// Queue a job; it runs on whichever worker is free first
    pub fn execute<F: FnOnce() + Send + 'static>(&self, job: F) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| HdbError::Shutdown("worker pool is closed".to_string()))?;
        sender
            .send(Box::new(job))
            .map_err(|_| HdbError::Shutdown("worker pool is closed".to_string()))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        join_all(self.handles.drain(..));
    }
}

// =============================================================================
// Delay Scheduler
// =============================================================================

struct Timer {
    due: Instant,
    job: Job,
}

/// Runs jobs after a delay on a single background thread
///
/// Timers still waiting when the scheduler is dropped never run.
pub struct DelayScheduler {
    sender: Option<Sender<Timer>>,
    handle: Option<JoinHandle<()>>,
}

impl DelayScheduler {
    pub fn new(name: &str) -> Result<Self> {
        let (sender, receiver) = channel::unbounded::<Timer>();
        let handle = thread::Builder::new()
            .name(format!("{}-scheduler", name))
            .spawn(move || Self::run(receiver))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Run `job` once `delay` has elapsed
    pub fn run_after<F: FnOnce() + Send + 'static>(&self, delay: Duration, job: F) -> Result<()> {
        let timer = Timer {
            due: Instant::now() + delay,
            job: Box::new(job),
        };
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| HdbError::Shutdown("scheduler is closed".to_string()))?;
        sender
            .send(timer)
            .map_err(|_| HdbError::Shutdown("scheduler is closed".to_string()))
    }

    fn run(receiver: Receiver<Timer>) {
        let mut pending: Vec<Timer> = Vec::new();

        loop {
            let next_due = pending.iter().map(|timer| timer.due).min();
            let received = match next_due {
                None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
                Some(due) => receiver.recv_timeout(due.saturating_duration_since(Instant::now())),
            };

            match received {
                Ok(timer) => pending.push(timer),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }

            let now = Instant::now();
            let (due, later): (Vec<Timer>, Vec<Timer>) = pending.drain(..).partition(|timer| timer.due <= now);
            pending = later;
            for timer in due {
                (timer.job)();
            }
        }
    }
}

impl Drop for DelayScheduler {
    fn drop(&mut self) {
        self.sender.take();
        join_all(self.handle.take());
    }
}

/// Join threads other than the current one
fn join_all(handles: impl IntoIterator<Item = JoinHandle<()>>) {
    let current = thread::current().id();
    for handle in handles {
        if handle.thread().id() != current {
            let _ = handle.join();
        }
    }
}
