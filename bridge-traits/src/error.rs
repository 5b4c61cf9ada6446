use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// Network hiccup the host expects to succeed on retry.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Bridge operation cancelled")]
    Cancelled,
}

impl BridgeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Network(_))
    }
}

impl From<core_async::Cancelled> for BridgeError {
    fn from(_: core_async::Cancelled) -> Self {
        BridgeError::Cancelled
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
