//! Error types for the Ratewarden service.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Ratewarden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A counter store call failed while evaluating a request.
    ///
    /// This is never a deny verdict; callers decide how to surface it.
    #[error("Failed to {operation} for key {key}: {source}")]
    Store {
        operation: StoreOperation,
        key: String,
        #[source]
        source: StoreError,
    },

    /// A caller-imposed deadline elapsed before the admission check finished
    #[error("Admission check did not finish within {0:?}")]
    Deadline(std::time::Duration),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The counter store call that was in flight when an evaluation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    IsBlocked,
    Increment,
    SetExpiration,
    Block,
    Reset,
}

impl std::fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StoreOperation::IsBlocked => "check block marker",
            StoreOperation::Increment => "increment counter",
            StoreOperation::SetExpiration => "set counter expiration",
            StoreOperation::Block => "install block marker",
            StoreOperation::Reset => "reset counter",
        };
        f.write_str(text)
    }
}

impl WardenError {
    /// Wrap a store failure with the operation and key it affected.
    pub(crate) fn store(operation: StoreOperation, key: &str, source: StoreError) -> Self {
        WardenError::Store {
            operation,
            key: key.to_string(),
            source,
        }
    }

    /// Returns `true` if this error came from the counter store.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, WardenError::Store { .. })
    }
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
