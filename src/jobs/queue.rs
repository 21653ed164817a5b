//! In-Memory Job Queue
//!
//! Tokio-based queue with a shared-receiver worker pool. Delivery is
//! at-least-once: a worker that fails a job schedules a delayed redelivery
//! until the attempt budget is spent, then hands the job to the handler's
//! exhaustion hook exactly once.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::WalletError;

use super::{JobHandler, JobId, JobOptions, JobPayload, JobQueue, JobVerdict};

/// Lifecycle of a queued job. Finished jobs stay in the table unless the
/// job's options asked for removal on completion or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    /// Failed attempt, redelivery scheduled.
    Delayed,
    Active,
    Completed,
    Failed,
    /// Cancelled before processing started.
    Removed,
}

struct JobEntry {
    payload: JobPayload,
    opts: JobOptions,
    /// Attempts started so far.
    attempts: u32,
    state: JobState,
    last_error: Option<String>,
}

/// In-process [`JobQueue`] implementation.
pub struct InMemoryJobQueue {
    jobs: DashMap<String, JobEntry>,
    tx: mpsc::UnboundedSender<JobId>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<JobId>>,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            jobs: DashMap::new(),
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Spawn `count` workers pulling from this queue.
    pub fn start_workers(
        self: &Arc<Self>,
        count: usize,
        handler: Arc<dyn JobHandler>,
    ) -> Vec<JoinHandle<()>> {
        info!(workers = count, "Starting job queue workers");
        (0..count)
            .map(|worker| {
                let queue = Arc::clone(self);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    loop {
                        let job_id = {
                            let mut rx = queue.rx.lock().await;
                            rx.recv().await
                        };
                        match job_id {
                            Some(job_id) => queue.process_one(job_id, handler.as_ref()).await,
                            None => {
                                debug!(worker, "Job channel closed, worker exiting");
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }

    async fn process_one(self: &Arc<Self>, job_id: JobId, handler: &dyn JobHandler) {
        let key = job_id.to_string();

        let (payload, opts, attempt) = {
            let mut entry = match self.jobs.get_mut(&key) {
                Some(entry) => entry,
                None => return,
            };
            if entry.state == JobState::Removed {
                debug!(job_id = %key, "Skipping removed job");
                return;
            }
            entry.state = JobState::Active;
            entry.attempts += 1;
            (entry.payload.clone(), entry.opts, entry.attempts)
        };

        match handler.handle(&payload).await {
            Ok(JobVerdict::Applied) => {
                debug!(job_id = %key, attempt, "Job completed");
                self.finish(&key, JobState::Completed, None, &opts);
            }
            Ok(JobVerdict::Skipped(e)) => {
                warn!(job_id = %key, error = %e, "Job skipped (already processed)");
                self.finish(&key, JobState::Completed, Some(e), &opts);
            }
            Ok(JobVerdict::Fatal(e)) => {
                error!(job_id = %key, error = %e, "Job failed permanently (no compensation target)");
                self.finish(&key, JobState::Failed, Some(e), &opts);
            }
            Err(e) => {
                if attempt < opts.attempts {
                    let delay = opts.backoff.delay_for(attempt);
                    warn!(
                        job_id = %key,
                        attempt,
                        max_attempts = opts.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Job failed, retrying with backoff"
                    );
                    self.schedule_redelivery(job_id, delay, e);
                } else {
                    error!(
                        job_id = %key,
                        attempts = attempt,
                        error = %e,
                        "Job exhausted its retry budget"
                    );
                    self.finish(&key, JobState::Failed, Some(e.clone()), &opts);
                    handler.on_exhausted(&payload, &e).await;
                }
            }
        }
    }

    fn finish(&self, key: &str, state: JobState, error: Option<WalletError>, opts: &JobOptions) {
        let drop_entry = match state {
            JobState::Completed => opts.remove_on_complete,
            JobState::Failed => opts.remove_on_fail,
            _ => false,
        };
        if drop_entry {
            // Dropping the entry also frees the job id for re-adding.
            self.jobs.remove(key);
            return;
        }
        if let Some(mut entry) = self.jobs.get_mut(key) {
            entry.state = state;
            entry.last_error = error.map(|e| e.to_string());
        }
    }

    fn schedule_redelivery(self: &Arc<Self>, job_id: JobId, delay: Duration, error: WalletError) {
        let key = job_id.to_string();
        if let Some(mut entry) = self.jobs.get_mut(&key) {
            entry.state = JobState::Delayed;
            entry.last_error = Some(error.to_string());
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(mut entry) = queue.jobs.get_mut(&key) {
                // A removal while delayed wins over the retry.
                if entry.state == JobState::Delayed {
                    entry.state = JobState::Waiting;
                    let _ = queue.tx.send(job_id);
                }
            }
        });
    }

    /// Current state of a job, if known to the queue.
    pub fn job_state(&self, job_id: &JobId) -> Option<JobState> {
        self.jobs.get(&job_id.to_string()).map(|e| e.state)
    }

    /// How many attempts have started for a job.
    pub fn attempts_made(&self, job_id: &JobId) -> u32 {
        self.jobs
            .get(&job_id.to_string())
            .map(|e| e.attempts)
            .unwrap_or(0)
    }

    /// Poll until the job reaches a final state or `timeout` elapses.
    pub async fn wait_until_finished(
        &self,
        job_id: &JobId,
        timeout: Duration,
    ) -> Option<JobState> {
        let deadline = tokio::time::Instant::now() + timeout;
        let key = job_id.to_string();
        loop {
            if let Some(entry) = self.jobs.get(&key) {
                match entry.state {
                    JobState::Completed | JobState::Failed | JobState::Removed => {
                        return Some(entry.state);
                    }
                    _ => {}
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait::async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        job_id: JobId,
        payload: JobPayload,
        opts: JobOptions,
    ) -> Result<bool, WalletError> {
        let key = job_id.to_string();
        match self.jobs.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                debug!(job_id = %key, "Duplicate job id, enqueue ignored");
                Ok(false)
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(JobEntry {
                    payload,
                    opts,
                    attempts: 0,
                    state: JobState::Waiting,
                    last_error: None,
                });
                self.tx
                    .send(job_id)
                    .map_err(|_| WalletError::Queue("job channel closed".to_string()))?;
                debug!(job_id = %key, "Job enqueued");
                Ok(true)
            }
        }
    }

    async fn remove(&self, job_id: &JobId) -> Result<bool, WalletError> {
        let key = job_id.to_string();
        if let Some(mut entry) = self.jobs.get_mut(&key) {
            if matches!(entry.state, JobState::Waiting | JobState::Delayed) {
                entry.state = JobState::Removed;
                debug!(job_id = %key, "Job removed before processing");
                return Ok(true);
            }
        }
        Ok(false)
    }
}
