//! Background job queue.
//!
//! [`JobQueue`] is the seam for dispatching follow-up work on stored
//! resources. [`LocalJobQueue`] is the in-process implementation: a priority
//! heap drained by a fixed set of worker tasks, each job run through a
//! [`JobHandler`] under the retry policy.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::retry::{RetryConfig, RetryExecutor};
use tessera_common::{Error, Locator, Result};

/// What a job does to its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Verify stored content against the recorded checksum.
    Process,
    /// Delete the content and its record.
    Cleanup,
    /// Store a new version from the payload.
    CreateVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    Normal,
    High,
}

/// A unit of background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub locator: Locator,
    pub payload: serde_json::Value,
    pub priority: JobPriority,
    pub enqueued_at: DateTime<Utc>,
}

/// Payload of a [`JobKind::CreateVersion`] job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPayload {
    /// Base64 (standard alphabet) content.
    pub content: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl VersionPayload {
    pub fn new(content: &[u8], message: Option<&str>) -> Self {
        Self {
            content: STANDARD.encode(content),
            message: message.map(str::to_string),
        }
    }

    /// Payload as JSON for [`JobQueue::enqueue`].
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Decoded content.
    ///
    /// # Errors
    /// - `Validation` if the content is not valid base64
    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.content)
            .map_err(|e| Error::Validation(format!("Invalid base64 payload: {}", e)))
    }
}

/// Final state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }
}

/// Caller's view of an enqueued job.
pub struct JobHandle {
    pub id: Uuid,
    pub kind: JobKind,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    /// Wait for the job to finish.
    pub async fn wait(self) -> JobOutcome {
        self.outcome.await.unwrap_or_else(|_| JobOutcome::Failed {
            attempts: 0,
            error: "job queue shut down before the job ran".to_string(),
        })
    }
}

/// Executes jobs.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<()>;
}

/// Queue accepting background jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job.
    ///
    /// # Errors
    /// - `Cancelled` if the queue is shut down
    async fn enqueue(
        &self,
        kind: JobKind,
        locator: Locator,
        payload: serde_json::Value,
        priority: JobPriority,
    ) -> Result<JobHandle>;
}

struct Queued {
    job: Job,
    sequence: u64,
    reply: oneshot::Sender<JobOutcome>,
}

// Highest priority first, then FIFO.
impl Ord for Queued {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.job
            .priority
            .cmp(&other.job.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for Queued {}

struct QueueState {
    heap: Mutex<BinaryHeap<Queued>>,
    notify: Notify,
    shutdown: CancellationToken,
    sequence: AtomicU64,
}

impl QueueState {
    fn pop(&self) -> Option<Queued> {
        self.heap.lock().unwrap_or_else(|e| e.into_inner()).pop()
    }
}

/// In-process priority job queue.
pub struct LocalJobQueue {
    state: Arc<QueueState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalJobQueue {
    /// Start a queue with `workers` worker tasks running `handler`.
    pub fn start(handler: Arc<dyn JobHandler>, retry: RetryConfig, workers: usize) -> Self {
        let state = Arc::new(QueueState {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
            sequence: AtomicU64::new(0),
        });
        let retry = Arc::new(RetryExecutor::new(retry));

        let workers = workers.max(1);
        info!("Starting job queue with {} workers", workers);
        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    state.clone(),
                    handler.clone(),
                    retry.clone(),
                ))
            })
            .collect();

        Self {
            state,
            workers: Mutex::new(handles),
        }
    }

    /// Jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.state.heap.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Stop accepting jobs, let workers drain the queue, and wait for them.
    pub async fn shutdown(&self) {
        self.state.shutdown.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Job worker ended abnormally: {}", e);
            }
        }
        info!("Job queue stopped");
    }
}

#[async_trait]
impl JobQueue for LocalJobQueue {
    async fn enqueue(
        &self,
        kind: JobKind,
        locator: Locator,
        payload: serde_json::Value,
        priority: JobPriority,
    ) -> Result<JobHandle> {
        if self.state.shutdown.is_cancelled() {
            return Err(Error::Cancelled("job queue is shut down".to_string()));
        }

        let job = Job {
            id: Uuid::new_v4(),
            kind,
            locator,
            payload,
            priority,
            enqueued_at: Utc::now(),
        };
        let (reply, outcome) = oneshot::channel();
        let handle = JobHandle {
            id: job.id,
            kind,
            outcome,
        };

        debug!("Enqueued {:?} job {} for {}", kind, job.id, job.locator);
        let sequence = self.state.sequence.fetch_add(1, Ordering::Relaxed);
        self.state
            .heap
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Queued {
                job,
                sequence,
                reply,
            });
        self.state.notify.notify_one();
        Ok(handle)
    }
}

async fn worker_loop(
    id: usize,
    state: Arc<QueueState>,
    handler: Arc<dyn JobHandler>,
    retry: Arc<RetryExecutor>,
) {
    loop {
        let Some(queued) = state.pop() else {
            if state.shutdown.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = state.notify.notified() => {}
                _ = state.shutdown.cancelled() => {}
            }
            continue;
        };

        let job = queued.job;
        let attempted = retry
            .execute(|| handler.handle(&job), Error::is_transient)
            .await;
        let attempts = attempted.attempts;

        let outcome = match attempted.result {
            Ok(()) => {
                debug!("Worker {} finished {:?} job {}", id, job.kind, job.id);
                JobOutcome::Succeeded { attempts }
            }
            Err(e) => {
                error!(
                    "{:?} job {} for {} failed after {} attempts: {}",
                    job.kind, job.id, job.locator, attempts, e
                );
                JobOutcome::Failed {
                    attempts,
                    error: e.to_string(),
                }
            }
        };
        // The caller may have dropped its handle.
        let _ = queued.reply.send(outcome);
    }
    debug!("Job worker {} exiting", id);
}
