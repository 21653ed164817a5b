//! Notification Intents
//!
//! The pipeline never talks to sockets or renders content. After a
//! successful confirmation or reversal (and after a permanent failure) it
//! emits a [`NotifyIntent`] onto an mpsc channel; a presence-tracking
//! collaborator on the receiving end owns delivery and formatting.

use tokio::sync::mpsc;
use tracing::debug;

use crate::core_types::{TransactionId, UserId};
use crate::transaction::TransactionType;

/// What happened, from the notified user's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    DepositConfirmed {
        amount: u64,
    },
    WithdrawConfirmed {
        amount: u64,
    },
    TransferSent {
        amount: u64,
        counterparty: UserId,
    },
    TransferReceived {
        amount: u64,
        counterparty: UserId,
    },
    /// `is_sender` distinguishes "the value returned to your wallet" from
    /// "the value was charged back".
    TransferReversed {
        amount: u64,
        counterparty: UserId,
        is_sender: bool,
    },
    OperationFailed {
        kind: TransactionType,
        amount: u64,
    },
}

/// "Notify user X about event Y" - the whole contract with the delivery
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyIntent {
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    pub event: WalletEvent,
}

/// Sender side handed to the pipeline components.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<NotifyIntent>,
}

impl Notifier {
    /// Emit an intent. A closed receiver is not an error for the pipeline:
    /// money movement must not fail because nobody is listening.
    pub fn emit(&self, user_id: UserId, transaction_id: TransactionId, event: WalletEvent) {
        let intent = NotifyIntent {
            user_id,
            transaction_id,
            event,
        };
        debug!(user_id, transaction_id = %transaction_id, event = ?intent.event, "Notify intent");
        let _ = self.tx.send(intent);
    }
}

/// Create a notifier and the receiver the delivery collaborator consumes.
pub fn notification_channel() -> (Notifier, mpsc::UnboundedReceiver<NotifyIntent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Notifier { tx }, rx)
}
