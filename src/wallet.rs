//! Wallet Record
//!
//! A custodial balance held for exactly one user. The balance is an integer
//! in minor currency units and is mutated only through the ledger store's
//! atomic write primitives: the conditional reservation decrement at
//! submission and the signed adjustments of a status commit.

use crate::core_types::{UserId, WalletId};

/// Custodial wallet balance.
///
/// `balance` is signed: reversals debit the receiver with no floor check,
/// so a wallet can legitimately carry debt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    pub id: WalletId,
    pub owner_id: UserId,
    /// Balance in minor currency units. Never floating point.
    pub balance: i64,
    /// Created timestamp (millis)
    pub created_at: i64,
    /// Last updated timestamp (millis)
    pub updated_at: i64,
}

impl Wallet {
    pub fn new(id: WalletId, owner_id: UserId, balance: i64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id,
            owner_id,
            balance,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `amount` can be reserved or withdrawn from this wallet.
    #[inline]
    pub fn can_cover(&self, amount: u64) -> bool {
        self.balance >= amount as i64
    }

    /// Apply a signed balance adjustment.
    ///
    /// No floor check here: reservation paths go through the store's
    /// conditional decrement, and reversal debits are allowed to push the
    /// balance negative.
    pub fn apply(&mut self, delta: i64) {
        self.balance += delta;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}
