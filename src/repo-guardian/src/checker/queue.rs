//! Bounded work queue dispatching repository jobs to a worker pool.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::github::GitHubClient;

use super::engine::{Engine, EngineError};

/// What initiated a repository check job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Webhook,
    Scheduler,
    Manual,
}

impl Trigger {
    /// Returns the metric label for this trigger.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Scheduler => "scheduler",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work for the checker engine. In-flight only; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoJob {
    pub owner: String,
    pub repo: String,
    pub installation_id: u64,
    pub trigger: Trigger,
}

/// Errors returned to producers by [`Queue::enqueue`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// The buffer is saturated; the producer decides what to do.
    #[error("queue is full (capacity {capacity})")]
    Full { capacity: usize },

    /// The queue has been stopped and accepts no further work.
    #[error("queue is stopped")]
    Stopped,
}

/// Bounded FIFO buffer of [`RepoJob`]s with a fixed worker pool.
pub struct Queue {
    tx: Mutex<Option<mpsc::Sender<RepoJob>>>,
    rx: Mutex<Option<mpsc::Receiver<RepoJob>>>,
    accepting: AtomicBool,
    capacity: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Queue {
    /// Creates a queue with the given buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);

        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            accepting: AtomicBool::new(true),
            capacity,
            workers: Mutex::new(Vec::new()),
            cancel: Mutex::new(None),
        }
    }

    /// Adds a job without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] when the buffer is saturated and
    /// [`EnqueueError::Stopped`] after [`Queue::stop`].
    pub fn enqueue(&self, job: RepoJob) -> Result<(), EnqueueError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(EnqueueError::Stopped);
        }

        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(EnqueueError::Stopped);
        };

        match tx.try_send(job.clone()) {
            Ok(()) => {
                debug!(
                    owner = %job.owner,
                    repo = %job.repo,
                    trigger = %job.trigger,
                    "job enqueued"
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(EnqueueError::Full {
                capacity: self.capacity,
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EnqueueError::Stopped),
        }
    }

    /// Spawns `worker_count` workers pulling jobs from the buffer. Each
    /// worker scopes the client to the job's installation, times the engine
    /// call, and records per-trigger and error metrics.
    pub fn start(
        &self,
        worker_count: usize,
        engine: Arc<Engine>,
        client: GitHubClient,
        cancel: &CancellationToken,
    ) {
        let Some(rx) = self.rx.lock().take() else {
            error!("work queue already started");
            return;
        };

        let child = cancel.child_token();
        *self.cancel.lock() = Some(child.clone());

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut workers = self.workers.lock();

        for worker_id in 0..worker_count {
            let rx = rx.clone();
            let engine = engine.clone();
            let client = client.clone();
            let cancel = child.clone();

            workers.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, engine, client, cancel).await;
            }));
        }

        info!(
            workers = worker_count,
            capacity = self.capacity,
            "work queue started"
        );
    }

    /// Stops accepting jobs, closes the buffer, cancels the workers, and
    /// waits for in-flight jobs to finish.
    pub async fn stop(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.tx.lock().take();

        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        info!("work queue stopped");
    }

    /// Returns the number of pending jobs in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx
            .lock()
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    /// Returns true when the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue accepts new jobs. Drives the readiness probe.
    #[must_use]
    pub fn accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<RepoJob>>>,
    engine: Arc<Engine>,
    client: GitHubClient,
    cancel: CancellationToken,
) {
    debug!(worker_id, "worker started");

    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            }
        };

        process_job(&engine, &client, job).await;
    }

    debug!(worker_id, "worker finished");
}

async fn process_job(engine: &Engine, client: &GitHubClient, job: RepoJob) {
    let start = Instant::now();

    info!(
        owner = %job.owner,
        repo = %job.repo,
        trigger = %job.trigger,
        installation_id = job.installation_id,
        "processing job"
    );

    let install_client = client.installation_client(job.installation_id);

    match engine.check_repo(&install_client, &job.owner, &job.repo).await {
        Ok(()) => {
            let duration = start.elapsed();
            engine.metrics().repo_checked(job.trigger.as_str());
            engine.metrics().observe_check_duration(duration.as_secs_f64());
            info!(
                owner = %job.owner,
                repo = %job.repo,
                duration_ms = duration.as_millis() as u64,
                "job completed"
            );
        }
        Err(e) => {
            error!(
                owner = %job.owner,
                repo = %job.repo,
                error = %e,
                "job failed"
            );
            engine.metrics().error(error_operation(&e));
        }
    }
}

/// Maps a failed check to its `errors_total` operation label. Failures to
/// obtain installation credentials are counted separately from check
/// failures.
fn error_operation(err: &EngineError) -> &'static str {
    if let EngineError::GitHub(crate::github::GitHubError::Api { operation, .. }) = err {
        if *operation == "mint_installation_token" {
            return "create_install_client";
        }
    }

    "check_repo"
}
