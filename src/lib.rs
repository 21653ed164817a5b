//! wallet_pipeline - Asynchronous Custodial Wallet Money Movement
//!
//! Deposits, withdrawals, transfers and transfer reversals over custodial
//! wallets, processed asynchronously: a submission reserves balance and
//! records a PENDING transaction, a queued job applies the mutation and
//! completes it, retry exhaustion compensates it back.
//!
//! # Modules
//!
//! - [`core_types`] - Core type definitions (UserId, WalletId, TransactionId)
//! - [`wallet`] - Custodial balance record
//! - [`transaction`] - Transaction record and status machine
//! - [`error`] - Pipeline error enum with API codes
//! - [`ledger`] - Storage boundary (in-memory and PostgreSQL stores)
//! - [`jobs`] - Job queue boundary: dedup, retries, backoff, worker pool
//! - [`pipeline`] - Submission, confirmation, compensation, reversal
//! - [`notify`] - Notification intents emitted by the pipeline
//! - [`config`] - YAML application configuration
//! - [`logging`] - tracing initialization

// Core types - must be first!
pub mod core_types;

// Domain records
pub mod transaction;
pub mod wallet;

pub mod error;

// Collaborator boundaries
pub mod jobs;
pub mod ledger;
pub mod notify;

// The four pipeline components and their wiring
pub mod pipeline;

pub mod config;
pub mod logging;

// Convenient re-exports at crate root
pub use config::{AppConfig, PipelineSettings};
pub use core_types::{TransactionId, UserId, WalletId};
pub use error::WalletError;
pub use jobs::{
    Backoff, InMemoryJobQueue, JobHandler, JobId, JobOptions, JobPayload, JobQueue, JobState,
    JobVerdict,
};
pub use ledger::{BalanceChange, LedgerStore, MemoryLedger, PgLedger};
pub use notify::{Notifier, NotifyIntent, WalletEvent, notification_channel};
pub use pipeline::{
    ConfirmationProcessor, FailureCompensator, Pipeline, PipelineHandler, ReversalService,
    SubmissionService,
};
pub use transaction::{ReversalInitiator, Transaction, TransactionStatus, TransactionType};
pub use wallet::Wallet;
