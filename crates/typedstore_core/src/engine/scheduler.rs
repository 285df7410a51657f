//! Execution contexts for asynchronous operations.

use log::error;
use std::thread;
use tokio::runtime::Handle;

/// Unit of work handed to a scheduler.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs somewhere other than the caller's stack.
///
/// A scheduler that cannot run a job must drop it; the pending operation then
/// resolves to `StoreError::Cancelled`.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, job: Job);
}

/// One named OS thread per job; the store default.
#[derive(Debug, Clone)]
pub struct ThreadScheduler {
    thread_name: String,
}

impl ThreadScheduler {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new("typedstore-worker")
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, job: Job) {
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(job);
        if let Err(err) = spawned {
            error!(
                "event=job_schedule module=scheduler status=error scheduler=thread error={err}"
            );
        }
    }
}

/// Runs jobs on a tokio runtime's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler for the runtime of the calling context, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, job: Job) {
        // The join handle is not needed: results travel through the job's channel.
        drop(self.handle.spawn_blocking(job));
    }
}

/// Runs each job synchronously inside `schedule`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, job: Job) {
        job();
    }
}
