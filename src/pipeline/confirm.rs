//! Confirmation Processor
//!
//! Consumes confirmation jobs delivered at-least-once by the queue. Each
//! handler re-loads the transaction and wallet(s), applies the deferred
//! balance mutation, and flips the status to COMPLETED through the store's
//! CAS commit, so a duplicate delivery observes a non-PENDING status and
//! no-ops.

use std::sync::Arc;
use tracing::info;

use crate::core_types::{TransactionId, WalletId};
use crate::error::WalletError;
use crate::jobs::JobVerdict;
use crate::ledger::{BalanceChange, LedgerStore};
use crate::notify::{Notifier, WalletEvent};
use crate::transaction::{Transaction, TransactionStatus};
use crate::wallet::Wallet;

pub struct ConfirmationProcessor {
    store: Arc<dyn LedgerStore>,
    notifier: Notifier,
}

impl ConfirmationProcessor {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// Deposit confirm: the only mutation point for deposit balances.
    pub async fn confirm_deposit(
        &self,
        transaction_id: TransactionId,
        to_wallet_id: WalletId,
    ) -> Result<JobVerdict, WalletError> {
        let mut tx = match self.load_transaction(transaction_id).await? {
            Loaded::Pending(tx) => tx,
            Loaded::Verdict(v) => return Ok(v),
        };
        let wallet = self.load_wallet(to_wallet_id).await?;

        tx.status = TransactionStatus::Completed;
        tx.touch();

        if !self
            .store
            .commit(
                &tx,
                TransactionStatus::Pending,
                &[BalanceChange::credit(wallet.id, tx.amount)],
            )
            .await?
        {
            return Ok(already_processed(transaction_id));
        }

        info!(transaction_id = %tx.id, amount = tx.amount, "Deposit confirmed");
        self.notifier.emit(
            wallet.owner_id,
            tx.id,
            WalletEvent::DepositConfirmed { amount: tx.amount },
        );
        Ok(JobVerdict::Applied)
    }

    /// Withdraw confirm: the balance already moved at submission, so only
    /// the status transitions here, after a defensive re-check that the
    /// reserved balance has not been drawn down by an unrelated path.
    pub async fn confirm_withdraw(
        &self,
        transaction_id: TransactionId,
        from_wallet_id: WalletId,
    ) -> Result<JobVerdict, WalletError> {
        let mut tx = match self.load_transaction(transaction_id).await? {
            Loaded::Pending(tx) => tx,
            Loaded::Verdict(v) => return Ok(v),
        };
        let wallet = self.load_wallet(from_wallet_id).await?;

        if !wallet.can_cover(tx.amount) {
            return Err(WalletError::InsufficientBalance(format!(
                "Wallet {from_wallet_id}"
            )));
        }

        tx.status = TransactionStatus::Completed;
        tx.touch();

        if !self.store.commit(&tx, TransactionStatus::Pending, &[]).await? {
            return Ok(already_processed(transaction_id));
        }

        info!(transaction_id = %tx.id, amount = tx.amount, "Withdrawal confirmed");
        self.notifier.emit(
            wallet.owner_id,
            tx.id,
            WalletEvent::WithdrawConfirmed { amount: tx.amount },
        );
        Ok(JobVerdict::Applied)
    }

    /// Transfer confirm: the sender was debited at submission; only the
    /// receiver credit and the status transition happen here, atomically.
    pub async fn confirm_transfer(
        &self,
        transaction_id: TransactionId,
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
    ) -> Result<JobVerdict, WalletError> {
        let mut tx = match self.load_transaction(transaction_id).await? {
            Loaded::Pending(tx) => tx,
            Loaded::Verdict(v) => return Ok(v),
        };
        let (from_wallet, to_wallet) = futures::try_join!(
            self.load_wallet(from_wallet_id),
            self.load_wallet(to_wallet_id)
        )?;

        if !from_wallet.can_cover(tx.amount) {
            return Err(WalletError::InsufficientBalance(format!(
                "Wallet {from_wallet_id}"
            )));
        }

        tx.status = TransactionStatus::Completed;
        tx.touch();

        if !self
            .store
            .commit(
                &tx,
                TransactionStatus::Pending,
                &[BalanceChange::credit(to_wallet.id, tx.amount)],
            )
            .await?
        {
            return Ok(already_processed(transaction_id));
        }

        info!(
            transaction_id = %tx.id,
            amount = tx.amount,
            from_wallet = from_wallet_id,
            to_wallet = to_wallet_id,
            "Transfer confirmed"
        );
        self.notifier.emit(
            from_wallet.owner_id,
            tx.id,
            WalletEvent::TransferSent {
                amount: tx.amount,
                counterparty: to_wallet.owner_id,
            },
        );
        self.notifier.emit(
            to_wallet.owner_id,
            tx.id,
            WalletEvent::TransferReceived {
                amount: tx.amount,
                counterparty: from_wallet.owner_id,
            },
        );
        Ok(JobVerdict::Applied)
    }

    async fn load_transaction(&self, id: TransactionId) -> Result<Loaded, WalletError> {
        let tx = match self.store.transaction(id).await? {
            Some(tx) => tx,
            // No compensation target exists; the job fails permanently.
            None => {
                return Ok(Loaded::Verdict(JobVerdict::Fatal(
                    WalletError::ResourceNotFound(format!("Transaction with id: {id}")),
                )));
            }
        };

        if tx.status != TransactionStatus::Pending {
            return Ok(Loaded::Verdict(already_processed(id)));
        }
        Ok(Loaded::Pending(tx))
    }

    async fn load_wallet(&self, id: WalletId) -> Result<Wallet, WalletError> {
        self.store
            .wallet(id)
            .await?
            .ok_or_else(|| WalletError::ResourceNotFound(format!("Wallet with id: {id}")))
    }
}

enum Loaded {
    Pending(Transaction),
    Verdict(JobVerdict),
}

fn already_processed(id: TransactionId) -> JobVerdict {
    JobVerdict::Skipped(WalletError::ResourceInvalid(format!(
        "Transaction {id} already processed"
    )))
}
