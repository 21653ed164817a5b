//! Job Queue Boundary
//!
//! Durable, at-least-once job delivery with per-job retry accounting and
//! exponential backoff. The pipeline only declares `attempts` and backoff
//! parameters at enqueue time; retry scheduling is owned by the queue.
//!
//! Jobs are retained after completion and failure for observability;
//! removal is an explicit operation and only cancels jobs that have not
//! started processing.

mod queue;

pub use queue::{InMemoryJobQueue, JobState};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::core_types::{TransactionId, WalletId};
use crate::error::WalletError;

/// Deduplication key for a logical unit of work.
///
/// Confirmation jobs render as the transaction id, reversal jobs as
/// `reverse-<transaction id>`, so a transaction can have at most one
/// active confirmation and one active reversal job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobId {
    Confirm(TransactionId),
    Reversal(TransactionId),
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobId::Confirm(id) => write!(f, "{id}"),
            JobId::Reversal(id) => write!(f, "reverse-{id}"),
        }
    }
}

/// What a worker should do when it picks the job up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    ConfirmDeposit {
        transaction_id: TransactionId,
        to_wallet_id: WalletId,
    },
    ConfirmWithdraw {
        transaction_id: TransactionId,
        from_wallet_id: WalletId,
    },
    ConfirmTransfer {
        transaction_id: TransactionId,
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
    },
    ReverseTransfer {
        transaction_id: TransactionId,
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
        reason: Option<String>,
    },
}

impl JobPayload {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            JobPayload::ConfirmDeposit { transaction_id, .. }
            | JobPayload::ConfirmWithdraw { transaction_id, .. }
            | JobPayload::ConfirmTransfer { transaction_id, .. }
            | JobPayload::ReverseTransfer { transaction_id, .. } => *transaction_id,
        }
    }
}

/// Retry backoff policy. Delay for attempt `n` (1-based) is
/// `base * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Self { base }
    }

    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        self.base * 2u32.saturating_pow(attempts_made.saturating_sub(1))
    }
}

/// Enqueue-time options. Defaults match the pipeline contract:
/// 3 attempts, exponential backoff from 2000 ms, jobs retained on both
/// completion and failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    pub attempts: u32,
    pub backoff: Backoff,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::exponential(Duration::from_millis(2000)),
            remove_on_complete: false,
            remove_on_fail: false,
        }
    }
}

/// Outcome of one job execution, next to the retryable `Err` path.
///
/// A handler distinguishes permanent no-ops from permanent dead-ends so
/// the queue neither retries a duplicate delivery nor compensates a
/// transaction that no longer exists.
#[derive(Debug, Clone)]
pub enum JobVerdict {
    /// Mutation committed and status transitioned.
    Applied,
    /// Precondition guard tripped (already processed); the job completes
    /// without effect.
    Skipped(WalletError),
    /// No retry and no compensation target (transaction record missing);
    /// the job fails permanently.
    Fatal(WalletError),
}

/// Consumer side of the queue.
///
/// `handle` errors are retried with backoff up to the job's `attempts`;
/// `on_exhausted` runs exactly once, after the final attempt has failed.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: &JobPayload) -> Result<JobVerdict, WalletError>;

    async fn on_exhausted(&self, payload: &JobPayload, error: &WalletError);
}

/// Producer side of the queue, as seen by the submission services.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job. Returns `false` when a job with the same id already
    /// exists (deduplication; retained finished jobs also block re-adds).
    async fn enqueue(
        &self,
        job_id: JobId,
        payload: JobPayload,
        opts: JobOptions,
    ) -> Result<bool, WalletError>;

    /// Cancel a job that has not started processing. Removal of an
    /// in-flight or finished job is a no-op returning `false`.
    async fn remove(&self, job_id: &JobId) -> Result<bool, WalletError>;
}
