//! Pipeline Error Types
//!
//! One tagged enum for the whole money-movement pipeline. The transport
//! collaborator maps `code()`/`http_status()` to its own responses instead
//! of inspecting concrete error types at runtime.

use thiserror::Error;

/// Errors returned by submission operations and job handlers.
#[derive(Error, Debug, Clone)]
pub enum WalletError {
    /// Referenced user, wallet or transaction does not exist.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Precondition violated: same-user transfer, transaction not in the
    /// expected status, reversal of a non-transfer or non-completed
    /// transaction, non-positive amount.
    #[error("Resource invalid: {0}")]
    ResourceInvalid(String),

    /// Reservation or confirmation-time balance check failed.
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Storage layer failure (retryable from the job queue's view).
    #[error("Store error: {0}")]
    Store(String),

    /// Job queue failure (enqueue after reservation, removal).
    #[error("Queue error: {0}")]
    Queue(String),
}

impl WalletError {
    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::ResourceNotFound(_) => "RESOURCE_NOT_FOUND",
            WalletError::ResourceInvalid(_) => "RESOURCE_INVALID",
            WalletError::InsufficientBalance(_) => "INSUFFICIENT_BALANCE",
            WalletError::Store(_) => "STORE_ERROR",
            WalletError::Queue(_) => "QUEUE_ERROR",
        }
    }

    /// Suggested HTTP status for the transport collaborator.
    pub fn http_status(&self) -> u16 {
        match self {
            WalletError::ResourceNotFound(_) => 404,
            WalletError::ResourceInvalid(_) => 400,
            WalletError::InsufficientBalance(_) => 422,
            WalletError::Store(_) | WalletError::Queue(_) => 500,
        }
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(e: sqlx::Error) -> Self {
        WalletError::Store(e.to_string())
    }
}

impl From<anyhow::Error> for WalletError {
    fn from(e: anyhow::Error) -> Self {
        WalletError::Store(e.to_string())
    }
}
