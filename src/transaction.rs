//! Transaction Record and Status Machine
//!
//! Status IDs are designed for storage as SMALLINT.
//!
//! ```text
//! PENDING ──confirm──▶ COMPLETED ──reversal──▶ REVERSED
//!    │                     │
//!    └──retries exhausted──┘──reversal retries exhausted──▶ COMPLETED (no-op)
//!    ▼
//!  FAILED
//! ```
//!
//! FAILED and REVERSED are terminal. `amount` is immutable after creation.

use std::fmt;

use crate::core_types::{TransactionId, WalletId};

/// Transaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum TransactionType {
    /// Credit a wallet; no source balance, nothing reserved.
    Deposit = 1,
    /// Debit a wallet; reserved at submission time.
    Withdraw = 2,
    /// Move between two wallets; sender side reserved at submission time.
    Transfer = 3,
}

impl TransactionType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransactionType::Deposit),
            2 => Some(TransactionType::Withdraw),
            3 => Some(TransactionType::Transfer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdraw => "WITHDRAW",
            TransactionType::Transfer => "TRANSFER",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransactionType {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransactionType::from_id(value).ok_or(())
    }
}

/// Transaction lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TransactionStatus {
    /// Created by submission; confirmation job queued.
    Pending = 0,
    /// Confirmation applied. Transfers can still move to REVERSED.
    Completed = 10,
    /// Terminal: a completed transfer was compensated back.
    Reversed = 20,
    /// Terminal: confirmation retries exhausted, reservation reverted.
    Failed = -10,
}

impl TransactionStatus {
    /// No more transitions possible from this status.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Reversed | TransactionStatus::Failed)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransactionStatus::Pending),
            10 => Some(TransactionStatus::Completed),
            20 => Some(TransactionStatus::Reversed),
            -10 => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Reversed => "REVERSED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransactionStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransactionStatus::from_id(value).ok_or(())
    }
}

/// Who asked for a reversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum ReversalInitiator {
    User = 1,
    System = 2,
}

impl ReversalInitiator {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(ReversalInitiator::User),
            2 => Some(ReversalInitiator::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReversalInitiator::User => "USER",
            ReversalInitiator::System => "SYSTEM",
        }
    }
}

/// Money-movement record.
///
/// Wallet references depend on the kind: DEPOSIT has `to_wallet_id`,
/// WITHDRAW has `from_wallet_id`, TRANSFER has both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TransactionType,
    /// Amount in minor units, always positive, immutable after creation.
    pub amount: u64,
    pub status: TransactionStatus,
    pub from_wallet_id: Option<WalletId>,
    pub to_wallet_id: Option<WalletId>,
    pub reversal_initiator: Option<ReversalInitiator>,
    pub reversal_reason: Option<String>,
    pub description: Option<String>,
    /// Created timestamp (millis)
    pub created_at: i64,
    /// Last updated timestamp (millis)
    pub updated_at: i64,
}

impl Transaction {
    /// Create a PENDING transaction record.
    pub fn pending(
        kind: TransactionType,
        amount: u64,
        from_wallet_id: Option<WalletId>,
        to_wallet_id: Option<WalletId>,
        description: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: TransactionId::new(),
            kind,
            amount,
            status: TransactionStatus::Pending,
            from_wallet_id,
            to_wallet_id,
            reversal_initiator: None,
            reversal_reason: None,
            description,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction[{}] {} amount={} status={} from={:?} to={:?}",
            self.id, self.kind, self.amount, self.status, self.from_wallet_id, self.to_wallet_id
        )
    }
}
