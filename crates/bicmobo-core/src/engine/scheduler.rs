use super::process::{self, ProcessError, ProcessOutput, ProcessSpec};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, warn};

/// Interval used by [`Scheduler::wait`] when a backend only offers polling.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A unit of work for a scheduler: one external program invocation.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub spec: ProcessSpec,
}

impl Job {
    pub fn new(name: impl Into<String>, spec: ProcessSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(u64);

pub type JobOutcome = Result<ProcessOutput, ProcessError>;

#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Queued,
    Running,
    Finished(JobOutcome),
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Finished(_))
    }
}

/// Execution backend for trial jobs.
pub trait Scheduler: Send + Sync {
    fn submit(&self, job: Job) -> JobHandle;

    /// Current status of a job, or `None` for an unknown (or already collected) handle.
    fn poll(&self, handle: JobHandle) -> Option<JobStatus>;

    /// Waits for a job to finish and returns its outcome, releasing the handle.
    fn wait(&self, handle: JobHandle) -> impl Future<Output = Option<JobOutcome>> + Send {
        async move {
            loop {
                match self.poll(handle)? {
                    JobStatus::Finished(outcome) => return Some(outcome),
                    _ => tokio::time::sleep(DEFAULT_POLL_INTERVAL).await,
                }
            }
        }
    }

    /// Submits a job and waits for it.
    fn run(&self, job: Job) -> impl Future<Output = JobOutcome> + Send {
        async move {
            let handle = self.submit(job);
            self.wait(handle)
                .await
                .unwrap_or_else(|| Err(ProcessError::Io("job handle was lost".to_string())))
        }
    }
}

/// Runs jobs as local subprocesses, at most `max_concurrency` at a time.
pub struct LocalScheduler {
    permits: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
    next_id: AtomicU64,
    jobs: Mutex<HashMap<JobHandle, watch::Receiver<JobStatus>>>,
}

impl LocalScheduler {
    pub fn new(max_concurrency: usize, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            shutdown,
            next_id: AtomicU64::new(0),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn receiver(&self, handle: JobHandle) -> Option<watch::Receiver<JobStatus>> {
        match self.jobs.lock() {
            Ok(jobs) => jobs.get(&handle).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&handle).cloned(),
        }
    }

    fn forget(&self, handle: JobHandle) {
        match self.jobs.lock() {
            Ok(mut jobs) => jobs.remove(&handle),
            Err(poisoned) => poisoned.into_inner().remove(&handle),
        };
    }
}

impl Scheduler for LocalScheduler {
    fn submit(&self, job: Job) -> JobHandle {
        let handle = JobHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (status_tx, status_rx) = watch::channel(JobStatus::Queued);
        match self.jobs.lock() {
            Ok(mut jobs) => jobs.insert(handle, status_rx),
            Err(poisoned) => poisoned.into_inner().insert(handle, status_rx),
        };

        let permits = Arc::clone(&self.permits);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) => {
                    debug!("Job '{}' started", job.name);
                    status_tx.send_replace(JobStatus::Running);
                    process::run(&job.spec, shutdown).await
                }
                Err(_) => Err(ProcessError::Cancelled),
            };
            if let Err(e) = &outcome {
                warn!("Job '{}' did not complete: {}", job.name, e);
            }
            status_tx.send_replace(JobStatus::Finished(outcome));
        });
        handle
    }

    fn poll(&self, handle: JobHandle) -> Option<JobStatus> {
        self.receiver(handle).map(|rx| rx.borrow().clone())
    }

    async fn wait(&self, handle: JobHandle) -> Option<JobOutcome> {
        let mut rx = self.receiver(handle)?;
        let outcome = match rx.wait_for(JobStatus::is_finished).await {
            Ok(status) => match &*status {
                JobStatus::Finished(outcome) => Some(outcome.clone()),
                _ => None,
            },
            Err(_) => None,
        };
        self.forget(handle);
        outcome
    }
}
