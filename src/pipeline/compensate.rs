//! Failure Compensation
//!
//! Runs after a job has exhausted its retry budget. Marks the transaction
//! with the caller-chosen terminal status and, when the failed operation
//! reserved balance at submission, returns the reserved amount to the
//! source wallet in the same atomic commit.
//!
//! The status transition is guarded by the same CAS as confirmation, so a
//! late retry that somehow raced a compensation cannot apply on top of it.

use std::sync::Arc;
use tracing::{info, warn};

use crate::core_types::{TransactionId, WalletId};
use crate::error::WalletError;
use crate::ledger::{BalanceChange, LedgerStore};
use crate::notify::{Notifier, WalletEvent};
use crate::transaction::TransactionStatus;

pub struct FailureCompensator {
    store: Arc<dyn LedgerStore>,
    notifier: Notifier,
}

impl FailureCompensator {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// Transition `transaction_id` from `expected` to the matching terminal
    /// outcome and revert the submission-time reservation when
    /// `should_change_amount` is set.
    ///
    /// `expected` is the status the transaction must still hold for the
    /// compensation to apply: PENDING for a confirmation that never landed,
    /// COMPLETED for a reversal that never landed. A PENDING transaction
    /// moves to FAILED; a COMPLETED one stays COMPLETED, only the
    /// reservation logic (normally off for that path) runs.
    pub async fn compensate(
        &self,
        transaction_id: TransactionId,
        expected: TransactionStatus,
        from_wallet_id: Option<WalletId>,
        should_change_amount: bool,
    ) -> Result<(), WalletError> {
        let mut tx = self
            .store
            .transaction(transaction_id)
            .await?
            .ok_or_else(|| {
                WalletError::ResourceNotFound(format!("Transaction with id: {transaction_id}"))
            })?;

        let mut changes = Vec::new();
        if should_change_amount {
            if let Some(wallet_id) = from_wallet_id.filter(|id| Some(*id) == tx.from_wallet_id) {
                match self.store.wallet(wallet_id).await? {
                    Some(wallet) => {
                        changes.push(BalanceChange::credit(wallet.id, tx.amount));
                    }
                    // Reservation revert target gone; still settle the status.
                    None => {
                        warn!(
                            transaction_id = %transaction_id,
                            wallet_id,
                            "Compensation skipping reservation revert, wallet missing"
                        );
                    }
                }
            }
        }

        let settled = match expected {
            TransactionStatus::Pending => TransactionStatus::Failed,
            other => other,
        };
        tx.status = settled;
        tx.touch();

        if !self.store.commit(&tx, expected, &changes).await? {
            warn!(
                transaction_id = %transaction_id,
                expected = %expected,
                "Compensation lost the status race, nothing applied"
            );
            return Ok(());
        }

        info!(
            transaction_id = %transaction_id,
            status = %settled,
            reverted_reservation = !changes.is_empty(),
            "Compensation applied"
        );

        if settled == TransactionStatus::Failed {
            if let Some(wallet) = self.initiating_wallet(&tx).await? {
                self.notifier.emit(
                    wallet.owner_id,
                    tx.id,
                    WalletEvent::OperationFailed {
                        kind: tx.kind,
                        amount: tx.amount,
                    },
                );
            }
        }
        Ok(())
    }

    async fn initiating_wallet(
        &self,
        tx: &crate::transaction::Transaction,
    ) -> Result<Option<crate::wallet::Wallet>, WalletError> {
        let Some(wallet_id) = tx.from_wallet_id.or(tx.to_wallet_id) else {
            return Ok(None);
        };
        self.store.wallet(wallet_id).await
    }
}
