//! In-Memory Ledger Store
//!
//! Single-process store backed by one mutex, which makes both write
//! primitives trivially atomic. Used by the worker-pool tests and as the
//! fallback store when no database is configured.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::core_types::{TransactionId, UserId, WalletId};
use crate::error::WalletError;
use crate::transaction::{Transaction, TransactionStatus};
use crate::wallet::Wallet;

use super::{BalanceChange, LedgerStore};

#[derive(Default)]
struct Inner {
    wallets: HashMap<WalletId, Wallet>,
    by_owner: HashMap<UserId, WalletId>,
    transactions: HashMap<TransactionId, Transaction>,
}

/// Mutex-guarded map store.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
    next_wallet_id: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_wallet_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A test panic while holding the lock poisons it; keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn create_wallet(
        &self,
        owner_id: UserId,
        initial_balance: i64,
    ) -> Result<Wallet, WalletError> {
        let mut inner = self.lock();
        if inner.by_owner.contains_key(&owner_id) {
            return Err(WalletError::ResourceInvalid(format!(
                "user {owner_id} already has a wallet"
            )));
        }

        let id = self.next_wallet_id.fetch_add(1, Ordering::SeqCst);
        let wallet = Wallet::new(id, owner_id, initial_balance);
        inner.by_owner.insert(owner_id, id);
        inner.wallets.insert(id, wallet.clone());
        Ok(wallet)
    }

    async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, WalletError> {
        Ok(self.lock().wallets.get(&id).cloned())
    }

    async fn wallet_of_user(&self, owner_id: UserId) -> Result<Option<Wallet>, WalletError> {
        let inner = self.lock();
        Ok(inner
            .by_owner
            .get(&owner_id)
            .and_then(|id| inner.wallets.get(id))
            .cloned())
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, WalletError> {
        Ok(self.lock().transactions.get(&id).cloned())
    }

    async fn insert_pending(
        &self,
        tx: &Transaction,
        reserve_from: Option<WalletId>,
    ) -> Result<(), WalletError> {
        let mut inner = self.lock();
        if inner.transactions.contains_key(&tx.id) {
            return Err(WalletError::Store(format!(
                "transaction {} already exists",
                tx.id
            )));
        }

        if let Some(wallet_id) = reserve_from {
            // Check and decrement under the same lock as the insert, so a
            // stale balance read by the caller cannot over-reserve.
            let wallet = inner.wallets.get_mut(&wallet_id).ok_or_else(|| {
                WalletError::ResourceNotFound(format!("Wallet with id: {wallet_id}"))
            })?;
            if !wallet.can_cover(tx.amount) {
                return Err(WalletError::InsufficientBalance(format!(
                    "Wallet {wallet_id}"
                )));
            }
            wallet.apply(-(tx.amount as i64));
        }
        inner.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn commit(
        &self,
        tx: &Transaction,
        expected: TransactionStatus,
        changes: &[BalanceChange],
    ) -> Result<bool, WalletError> {
        let mut inner = self.lock();

        let stored = inner.transactions.get(&tx.id).ok_or_else(|| {
            WalletError::ResourceNotFound(format!("Transaction with id: {}", tx.id))
        })?;
        if stored.status != expected {
            return Ok(false);
        }

        for change in changes {
            if !inner.wallets.contains_key(&change.wallet_id) {
                return Err(WalletError::ResourceNotFound(format!(
                    "Wallet with id: {}",
                    change.wallet_id
                )));
            }
        }
        for change in changes {
            if let Some(wallet) = inner.wallets.get_mut(&change.wallet_id) {
                wallet.apply(change.delta);
            }
        }
        inner.transactions.insert(tx.id, tx.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionType;

    #[tokio::test]
    async fn test_wallet_lookup_by_owner() {
        let store = MemoryLedger::new();
        let wallet = store.create_wallet(1001, 500).await.unwrap();

        let found = store.wallet_of_user(1001).await.unwrap().unwrap();
        assert_eq!(found.id, wallet.id);
        assert_eq!(found.balance, 500);
        assert!(store.wallet_of_user(9999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_wallet_per_owner() {
        let store = MemoryLedger::new();
        store.create_wallet(1001, 0).await.unwrap();
        let err = store.create_wallet(1001, 0).await.unwrap_err();
        assert!(matches!(err, WalletError::ResourceInvalid(_)));
    }

    #[tokio::test]
    async fn test_insert_pending_with_reservation() {
        let store = MemoryLedger::new();
        let wallet = store.create_wallet(1001, 10_000).await.unwrap();

        let tx = Transaction::pending(
            TransactionType::Withdraw,
            4_000,
            Some(wallet.id),
            None,
            None,
        );
        store.insert_pending(&tx, Some(wallet.id)).await.unwrap();

        let stored_wallet = store.wallet(wallet.id).await.unwrap().unwrap();
        assert_eq!(stored_wallet.balance, 6_000);
        let stored_tx = store.transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored_tx.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_uncovered_reservation_inserts_nothing() {
        let store = MemoryLedger::new();
        let wallet = store.create_wallet(1001, 1_000).await.unwrap();

        let tx = Transaction::pending(
            TransactionType::Withdraw,
            5_000,
            Some(wallet.id),
            None,
            None,
        );
        let err = store
            .insert_pending(&tx, Some(wallet.id))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InsufficientBalance(_)));

        // The whole unit failed: no record, no balance change
        assert!(store.transaction(tx.id).await.unwrap().is_none());
        assert_eq!(
            store.wallet(wallet.id).await.unwrap().unwrap().balance,
            1_000
        );
    }

    #[tokio::test]
    async fn test_commit_cas_rejects_stale_status() {
        let store = MemoryLedger::new();
        let wallet = store.create_wallet(1001, 0).await.unwrap();

        let mut tx =
            Transaction::pending(TransactionType::Deposit, 1_000, None, Some(wallet.id), None);
        store.insert_pending(&tx, None).await.unwrap();

        tx.status = TransactionStatus::Completed;
        let credit = BalanceChange::credit(wallet.id, 1_000);

        // First commit wins the CAS
        assert!(
            store
                .commit(&tx, TransactionStatus::Pending, &[credit])
                .await
                .unwrap()
        );
        // A replay expecting PENDING loses it and applies no delta
        assert!(
            !store
                .commit(&tx, TransactionStatus::Pending, &[credit])
                .await
                .unwrap()
        );
        assert_eq!(
            store.wallet(wallet.id).await.unwrap().unwrap().balance,
            1_000
        );
    }

    #[tokio::test]
    async fn test_commit_deltas_preserve_interleaved_reservation() {
        let store = MemoryLedger::new();
        let wallet = store.create_wallet(1001, 10_000).await.unwrap();

        let mut deposit =
            Transaction::pending(TransactionType::Deposit, 2_000, None, Some(wallet.id), None);
        store.insert_pending(&deposit, None).await.unwrap();

        // A withdrawal reserves after the deposit worker has already read
        // the wallet
        let withdraw = Transaction::pending(
            TransactionType::Withdraw,
            6_000,
            Some(wallet.id),
            None,
            None,
        );
        store.insert_pending(&withdraw, Some(wallet.id)).await.unwrap();
        assert_eq!(
            store.wallet(wallet.id).await.unwrap().unwrap().balance,
            4_000
        );

        // The deposit commit lands on top of the reservation, not over it
        deposit.status = TransactionStatus::Completed;
        assert!(
            store
                .commit(
                    &deposit,
                    TransactionStatus::Pending,
                    &[BalanceChange::credit(wallet.id, 2_000)]
                )
                .await
                .unwrap()
        );
        assert_eq!(
            store.wallet(wallet.id).await.unwrap().unwrap().balance,
            6_000
        );
    }
}
