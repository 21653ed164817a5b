//! Money-Movement Pipeline
//!
//! The four components of the asynchronous wallet pipeline plus the wiring
//! that turns them into a running worker pool:
//!
//! - [`SubmissionService`] - validation, reservation, PENDING record,
//!   confirmation job.
//! - [`ConfirmationProcessor`] - deferred balance mutation and the
//!   PENDING to COMPLETED transition.
//! - [`FailureCompensator`] - terminal settlement after a job exhausts
//!   its retry budget.
//! - [`ReversalService`] - queued undo of a completed transfer.
//!
//! [`Pipeline::start`] assembles all of them over one store and one queue.

mod compensate;
mod confirm;
mod reverse;
mod submit;

#[cfg(test)]
mod integration_tests;

pub use compensate::FailureCompensator;
pub use confirm::ConfirmationProcessor;
pub use reverse::ReversalService;
pub use submit::SubmissionService;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

use crate::config::PipelineSettings;
use crate::error::WalletError;
use crate::jobs::{
    Backoff, InMemoryJobQueue, JobHandler, JobOptions, JobPayload, JobQueue, JobVerdict,
};
use crate::ledger::LedgerStore;
use crate::notify::{NotifyIntent, notification_channel};
use crate::transaction::TransactionStatus;

/// Routes queue deliveries to the right processor and owns the
/// exhaustion-time compensation contract.
pub struct PipelineHandler {
    confirm: ConfirmationProcessor,
    reversal: ReversalService,
    compensator: FailureCompensator,
}

impl PipelineHandler {
    pub fn new(
        confirm: ConfirmationProcessor,
        reversal: ReversalService,
        compensator: FailureCompensator,
    ) -> Self {
        Self {
            confirm,
            reversal,
            compensator,
        }
    }
}

#[async_trait]
impl JobHandler for PipelineHandler {
    async fn handle(&self, payload: &JobPayload) -> Result<JobVerdict, WalletError> {
        match payload {
            JobPayload::ConfirmDeposit {
                transaction_id,
                to_wallet_id,
            } => self.confirm.confirm_deposit(*transaction_id, *to_wallet_id).await,
            JobPayload::ConfirmWithdraw {
                transaction_id,
                from_wallet_id,
            } => {
                self.confirm
                    .confirm_withdraw(*transaction_id, *from_wallet_id)
                    .await
            }
            JobPayload::ConfirmTransfer {
                transaction_id,
                from_wallet_id,
                to_wallet_id,
            } => {
                self.confirm
                    .confirm_transfer(*transaction_id, *from_wallet_id, *to_wallet_id)
                    .await
            }
            JobPayload::ReverseTransfer {
                transaction_id,
                from_wallet_id,
                to_wallet_id,
                reason,
            } => {
                self.reversal
                    .process_reversal(
                        *transaction_id,
                        *from_wallet_id,
                        *to_wallet_id,
                        reason.clone(),
                    )
                    .await
            }
        }
    }

    /// Per-payload compensation contract. Only operations that reserved
    /// balance at submission get their reservation reverted; an exhausted
    /// reversal leaves the transfer COMPLETED and both balances alone.
    async fn on_exhausted(&self, payload: &JobPayload, error: &WalletError) {
        let result = match payload {
            JobPayload::ConfirmDeposit { transaction_id, .. } => {
                self.compensator
                    .compensate(*transaction_id, TransactionStatus::Pending, None, false)
                    .await
            }
            JobPayload::ConfirmWithdraw {
                transaction_id,
                from_wallet_id,
            }
            | JobPayload::ConfirmTransfer {
                transaction_id,
                from_wallet_id,
                ..
            } => {
                self.compensator
                    .compensate(
                        *transaction_id,
                        TransactionStatus::Pending,
                        Some(*from_wallet_id),
                        true,
                    )
                    .await
            }
            JobPayload::ReverseTransfer {
                transaction_id,
                from_wallet_id,
                ..
            } => {
                self.compensator
                    .compensate(
                        *transaction_id,
                        TransactionStatus::Completed,
                        Some(*from_wallet_id),
                        false,
                    )
                    .await
            }
        };

        if let Err(compensation_error) = result {
            error!(
                transaction_id = %payload.transaction_id(),
                job_error = %error,
                compensation_error = %compensation_error,
                "Compensation after retry exhaustion failed"
            );
        }
    }
}

/// Assembled pipeline: services sharing one store, one queue and one
/// notification channel, with a running worker pool.
pub struct Pipeline {
    submission: SubmissionService,
    reversal: ReversalService,
    queue: Arc<InMemoryJobQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Build every component over `store` and start the worker pool.
    /// Returns the pipeline and the receiver for notification intents.
    pub fn start(
        store: Arc<dyn LedgerStore>,
        settings: &PipelineSettings,
    ) -> (Self, mpsc::UnboundedReceiver<NotifyIntent>) {
        let job_opts = JobOptions {
            attempts: settings.max_attempts,
            backoff: Backoff::exponential(Duration::from_millis(settings.backoff_base_ms)),
            ..JobOptions::default()
        };

        let queue = Arc::new(InMemoryJobQueue::new());
        let (notifier, notifications) = notification_channel();

        let submission = SubmissionService::new(
            store.clone(),
            queue.clone() as Arc<dyn JobQueue>,
            job_opts,
        );
        let reversal = ReversalService::new(
            store.clone(),
            queue.clone() as Arc<dyn JobQueue>,
            notifier.clone(),
            job_opts,
        );

        let handler = Arc::new(PipelineHandler::new(
            ConfirmationProcessor::new(store.clone(), notifier.clone()),
            ReversalService::new(
                store.clone(),
                queue.clone() as Arc<dyn JobQueue>,
                notifier.clone(),
                job_opts,
            ),
            FailureCompensator::new(store.clone(), notifier),
        ));
        let workers = queue.start_workers(settings.workers, handler);

        (
            Self {
                submission,
                reversal,
                queue,
                workers,
            },
            notifications,
        )
    }

    pub fn submission(&self) -> &SubmissionService {
        &self.submission
    }

    pub fn reversal(&self) -> &ReversalService {
        &self.reversal
    }

    pub fn queue(&self) -> &Arc<InMemoryJobQueue> {
        &self.queue
    }

    /// Abort the worker tasks. In-flight jobs are dropped mid-attempt;
    /// at-least-once delivery makes that safe for a durable queue, and the
    /// in-memory queue is gone with the process anyway.
    pub fn shutdown(&self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}
