//! Transfer Reversal
//!
//! Two halves, mirroring submission/confirmation: `submit_reversal`
//! validates and enqueues without mutating anything, `process_reversal`
//! runs on a worker and moves the value back.
//!
//! The receiver is debited unconditionally. A receiver who already spent
//! the transferred value goes negative; that is a debt the wallet carries,
//! not an error, and it is why reversal processing never balance-checks the
//! receiver side.

use std::sync::Arc;
use tracing::info;

use crate::core_types::{TransactionId, UserId, WalletId};
use crate::error::WalletError;
use crate::jobs::{JobId, JobOptions, JobPayload, JobQueue, JobVerdict};
use crate::ledger::{BalanceChange, LedgerStore};
use crate::notify::{Notifier, WalletEvent};
use crate::transaction::{ReversalInitiator, TransactionStatus, TransactionType};
use crate::wallet::Wallet;

const DEFAULT_REVERSAL_REASON: &str = "Transfer reversal";

pub struct ReversalService {
    store: Arc<dyn LedgerStore>,
    queue: Arc<dyn JobQueue>,
    notifier: Notifier,
    job_opts: JobOptions,
}

impl ReversalService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        queue: Arc<dyn JobQueue>,
        notifier: Notifier,
        job_opts: JobOptions,
    ) -> Self {
        Self {
            store,
            queue,
            notifier,
            job_opts,
        }
    }

    /// Validate and enqueue a reversal for a completed transfer the user
    /// sent. No balances or statuses change here.
    ///
    /// The job id `reverse-<transaction id>` deduplicates repeat requests
    /// for the same transfer.
    pub async fn submit_reversal(
        &self,
        user_id: UserId,
        transaction_id: TransactionId,
        reason: Option<String>,
    ) -> Result<bool, WalletError> {
        let requester_wallet = self
            .store
            .wallet_of_user(user_id)
            .await?
            .ok_or_else(|| WalletError::ResourceNotFound(format!("User with id: {user_id}")))?;

        let tx = self.store.transaction(transaction_id).await?.ok_or_else(|| {
            WalletError::ResourceNotFound(format!("Transaction with id: {transaction_id}"))
        })?;

        if tx.kind != TransactionType::Transfer {
            return Err(WalletError::ResourceInvalid(format!(
                "Transaction {transaction_id} is not a transfer"
            )));
        }
        if tx.from_wallet_id != Some(requester_wallet.id) {
            return Err(WalletError::ResourceInvalid(format!(
                "Transaction {transaction_id} was not sent by user {user_id}"
            )));
        }
        if tx.status != TransactionStatus::Completed {
            return Err(WalletError::ResourceInvalid(format!(
                "Transaction {transaction_id} is not completed"
            )));
        }
        let to_wallet_id = tx.to_wallet_id.ok_or_else(|| {
            WalletError::ResourceInvalid(format!(
                "Transaction {transaction_id} has no receiver wallet"
            ))
        })?;

        let enqueued = self
            .queue
            .enqueue(
                JobId::Reversal(transaction_id),
                JobPayload::ReverseTransfer {
                    transaction_id,
                    from_wallet_id: requester_wallet.id,
                    to_wallet_id,
                    reason,
                },
                self.job_opts,
            )
            .await?;

        info!(
            transaction_id = %transaction_id,
            user_id,
            enqueued,
            "Reversal submitted"
        );
        Ok(enqueued)
    }

    /// Worker half: credit the original sender back, debit the receiver,
    /// and flip COMPLETED to REVERSED in one commit.
    pub async fn process_reversal(
        &self,
        transaction_id: TransactionId,
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
        reason: Option<String>,
    ) -> Result<JobVerdict, WalletError> {
        let mut tx = match self.store.transaction(transaction_id).await? {
            Some(tx) => tx,
            None => {
                return Ok(JobVerdict::Fatal(WalletError::ResourceNotFound(format!(
                    "Transaction with id: {transaction_id}"
                ))));
            }
        };
        if tx.status != TransactionStatus::Completed {
            return Ok(JobVerdict::Skipped(WalletError::ResourceInvalid(format!(
                "Transaction {transaction_id} already processed"
            ))));
        }

        let (from_wallet, to_wallet) = futures::try_join!(
            self.load_wallet(from_wallet_id),
            self.load_wallet(to_wallet_id)
        )?;

        tx.status = TransactionStatus::Reversed;
        tx.reversal_initiator = Some(ReversalInitiator::User);
        tx.reversal_reason = Some(reason.unwrap_or_else(|| DEFAULT_REVERSAL_REASON.to_string()));
        tx.touch();

        // The receiver debit is unconditional; the wallet goes negative
        // when the value was already spent.
        if !self
            .store
            .commit(
                &tx,
                TransactionStatus::Completed,
                &[
                    BalanceChange::credit(from_wallet.id, tx.amount),
                    BalanceChange::debit(to_wallet.id, tx.amount),
                ],
            )
            .await?
        {
            return Ok(JobVerdict::Skipped(WalletError::ResourceInvalid(format!(
                "Transaction {transaction_id} already processed"
            ))));
        }

        info!(
            transaction_id = %transaction_id,
            amount = tx.amount,
            from_wallet = from_wallet_id,
            to_wallet = to_wallet_id,
            "Transfer reversed"
        );
        self.notifier.emit(
            from_wallet.owner_id,
            tx.id,
            WalletEvent::TransferReversed {
                amount: tx.amount,
                counterparty: to_wallet.owner_id,
                is_sender: true,
            },
        );
        self.notifier.emit(
            to_wallet.owner_id,
            tx.id,
            WalletEvent::TransferReversed {
                amount: tx.amount,
                counterparty: from_wallet.owner_id,
                is_sender: false,
            },
        );
        Ok(JobVerdict::Applied)
    }

    async fn load_wallet(&self, id: WalletId) -> Result<Wallet, WalletError> {
        self.store
            .wallet(id)
            .await?
            .ok_or_else(|| WalletError::ResourceNotFound(format!("Wallet with id: {id}")))
    }
}
