//! Ledger Store Boundary
//!
//! Persistence collaborator for wallets and transactions. The pipeline only
//! needs a handful of reads plus two atomic write primitives:
//!
//! - [`LedgerStore::insert_pending`] - persist a new PENDING transaction
//!   together with the submission-time reservation on the source wallet
//!   (one atomic unit, so a crash never leaves a reservation without its
//!   transaction or vice versa). The reservation is a conditional
//!   decrement against the wallet's current balance, not a write of a
//!   balance the caller read earlier, so two concurrent submissions that
//!   both read the same balance cannot both reserve it.
//! - [`LedgerStore::commit`] - CAS transition: persist a status change plus
//!   balance adjustments, only if the stored status still matches the
//!   expected one. Adjustments are signed deltas applied to the stored
//!   balances ([`BalanceChange`]), never absolute overwrites, so a commit
//!   cannot clobber a reservation that landed after this worker's read.
//!   Partial application is never observable; a lost CAS race simply
//!   returns `false`.
//!
//! Every write through this trait must be treated by the caching
//! collaborator as invalidating cached reads keyed by the entity's unique
//! lookup fields (wallet id, owner id, transaction id).

mod memory;
mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

use async_trait::async_trait;

use crate::core_types::{TransactionId, UserId, WalletId};
use crate::error::WalletError;
use crate::transaction::{Transaction, TransactionStatus};
use crate::wallet::Wallet;

/// Signed balance adjustment carried by [`LedgerStore::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub wallet_id: WalletId,
    pub delta: i64,
}

impl BalanceChange {
    pub fn credit(wallet_id: WalletId, amount: u64) -> Self {
        Self {
            wallet_id,
            delta: amount as i64,
        }
    }

    pub fn debit(wallet_id: WalletId, amount: u64) -> Self {
        Self {
            wallet_id,
            delta: -(amount as i64),
        }
    }
}

/// Atomic read/write access to Wallet and Transaction records.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create a wallet for `owner_id`. One wallet per owner.
    async fn create_wallet(
        &self,
        owner_id: UserId,
        initial_balance: i64,
    ) -> Result<Wallet, WalletError>;

    async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, WalletError>;

    async fn wallet_of_user(&self, owner_id: UserId) -> Result<Option<Wallet>, WalletError>;

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, WalletError>;

    /// Atomically insert a PENDING transaction. When `reserve_from` is
    /// given, the transaction's amount is reserved from that wallet in the
    /// same unit, as a conditional decrement against the wallet's current
    /// balance. A balance that no longer covers the amount fails the whole
    /// unit with `InsufficientBalance` and inserts nothing.
    async fn insert_pending(
        &self,
        tx: &Transaction,
        reserve_from: Option<WalletId>,
    ) -> Result<(), WalletError>;

    /// Atomically persist a status transition plus balance adjustments.
    ///
    /// Applies only if the stored status equals `expected` (conditional
    /// update at the storage layer, not check-then-write in application
    /// code). Returns `false` when the status no longer matches, which the
    /// caller treats as "another worker got there first". Each
    /// [`BalanceChange`] is added to the wallet's stored balance.
    async fn commit(
        &self,
        tx: &Transaction,
        expected: TransactionStatus,
        changes: &[BalanceChange],
    ) -> Result<bool, WalletError>;
}
