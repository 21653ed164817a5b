//! Submission Service
//!
//! Front door of the pipeline: validates preconditions, performs the
//! synchronous balance reservation where required, persists the initial
//! PENDING transaction, and enqueues the confirmation job.
//!
//! Withdrawals and transfers debit the source wallet here, at submission
//! time, not at confirmation time. The reservation itself is the store's
//! conditional decrement, guarded against the wallet's current balance in
//! the same atomic unit as the PENDING insert. That closes the race where
//! two concurrent withdrawals read the same balance before either
//! reserves: the second reservation finds the decremented balance and
//! fails, inserting nothing. The `can_cover` check before the insert only
//! short-circuits the obvious case. Deposits have no source balance to
//! protect, so nothing is reserved and the credit is entirely deferred to
//! confirmation.

use std::sync::Arc;
use tracing::info;

use crate::core_types::UserId;
use crate::error::WalletError;
use crate::jobs::{JobId, JobOptions, JobPayload, JobQueue};
use crate::ledger::LedgerStore;
use crate::transaction::{Transaction, TransactionType};

pub struct SubmissionService {
    store: Arc<dyn LedgerStore>,
    queue: Arc<dyn JobQueue>,
    job_opts: JobOptions,
}

impl SubmissionService {
    pub fn new(store: Arc<dyn LedgerStore>, queue: Arc<dyn JobQueue>, job_opts: JobOptions) -> Self {
        Self {
            store,
            queue,
            job_opts,
        }
    }

    /// Credit `amount` to the user's wallet, asynchronously.
    ///
    /// No balance check and no reservation; the wallet is only touched by
    /// the confirmation job.
    pub async fn deposit(
        &self,
        user_id: UserId,
        amount: u64,
        description: Option<String>,
    ) -> Result<Transaction, WalletError> {
        validate_amount(amount)?;

        let wallet = self
            .store
            .wallet_of_user(user_id)
            .await?
            .ok_or_else(|| WalletError::ResourceNotFound(format!("User with id: {user_id}")))?;

        let tx = Transaction::pending(
            TransactionType::Deposit,
            amount,
            None,
            Some(wallet.id),
            Some(description.unwrap_or_else(|| "Account deposit".to_string())),
        );

        self.store.insert_pending(&tx, None).await?;
        self.queue
            .enqueue(
                JobId::Confirm(tx.id),
                JobPayload::ConfirmDeposit {
                    transaction_id: tx.id,
                    to_wallet_id: wallet.id,
                },
                self.job_opts,
            )
            .await?;

        info!(transaction_id = %tx.id, user_id, amount, "Deposit submitted");
        Ok(tx)
    }

    /// Debit `amount` from the user's wallet.
    ///
    /// The balance is reserved here, in the same atomic store write that
    /// persists the PENDING transaction.
    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount: u64,
        description: Option<String>,
    ) -> Result<Transaction, WalletError> {
        validate_amount(amount)?;

        let wallet = self
            .store
            .wallet_of_user(user_id)
            .await?
            .ok_or_else(|| WalletError::ResourceNotFound(format!("User with id: {user_id}")))?;

        if !wallet.can_cover(amount) {
            return Err(WalletError::InsufficientBalance(format!(
                "Wallet {}",
                wallet.id
            )));
        }

        let tx = Transaction::pending(
            TransactionType::Withdraw,
            amount,
            Some(wallet.id),
            None,
            Some(description.unwrap_or_else(|| "Account withdrawal".to_string())),
        );

        // reserve: conditional decrement, atomic with the insert
        self.store.insert_pending(&tx, Some(wallet.id)).await?;
        self.queue
            .enqueue(
                JobId::Confirm(tx.id),
                JobPayload::ConfirmWithdraw {
                    transaction_id: tx.id,
                    from_wallet_id: wallet.id,
                },
                self.job_opts,
            )
            .await?;

        info!(transaction_id = %tx.id, user_id, amount, "Withdrawal submitted, balance reserved");
        Ok(tx)
    }

    /// Move `amount` from one user's wallet to another's.
    ///
    /// The sender side is reserved here; the receiver credit is deferred
    /// to confirmation.
    pub async fn transfer(
        &self,
        user_id: UserId,
        to_user_id: UserId,
        amount: u64,
        description: Option<String>,
    ) -> Result<Transaction, WalletError> {
        validate_amount(amount)?;

        if user_id == to_user_id {
            return Err(WalletError::ResourceInvalid(
                "Cannot transfer to the same user".to_string(),
            ));
        }

        let from_wallet = self
            .store
            .wallet_of_user(user_id)
            .await?
            .ok_or_else(|| WalletError::ResourceNotFound(format!("User with id: {user_id}")))?;
        let to_wallet = self
            .store
            .wallet_of_user(to_user_id)
            .await?
            .ok_or_else(|| WalletError::ResourceNotFound(format!("User with id: {to_user_id}")))?;

        if !from_wallet.can_cover(amount) {
            return Err(WalletError::InsufficientBalance(format!(
                "Wallet {}",
                from_wallet.id
            )));
        }

        let tx = Transaction::pending(
            TransactionType::Transfer,
            amount,
            Some(from_wallet.id),
            Some(to_wallet.id),
            Some(description.unwrap_or_else(|| "Transfer sent".to_string())),
        );

        // reserve: conditional decrement, atomic with the insert
        self.store.insert_pending(&tx, Some(from_wallet.id)).await?;
        self.queue
            .enqueue(
                JobId::Confirm(tx.id),
                JobPayload::ConfirmTransfer {
                    transaction_id: tx.id,
                    from_wallet_id: from_wallet.id,
                    to_wallet_id: to_wallet.id,
                },
                self.job_opts,
            )
            .await?;

        info!(
            transaction_id = %tx.id,
            from_user = user_id,
            to_user = to_user_id,
            amount,
            "Transfer submitted, sender balance reserved"
        );
        Ok(tx)
    }
}

/// Largest submittable amount; keeps every `u64` to `i64` balance cast in
/// the stores lossless.
const MAX_AMOUNT: u64 = i64::MAX as u64;

fn validate_amount(amount: u64) -> Result<(), WalletError> {
    if amount == 0 {
        return Err(WalletError::ResourceInvalid(
            "Amount must be positive".to_string(),
        ));
    }
    if amount > MAX_AMOUNT {
        return Err(WalletError::ResourceInvalid(
            "Amount exceeds the representable maximum".to_string(),
        ));
    }
    Ok(())
}
