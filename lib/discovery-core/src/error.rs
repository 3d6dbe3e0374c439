use thiserror::Error;

use crate::context::Interrupted;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registry backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("No healthy instances of service: {0}")]
    NotFound(String),

    #[error("Invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Unknown instance: {0}")]
    UnknownInstance(String),

    #[error("Registry rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed registry response: {0}")]
    MalformedResponse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Registry call cancelled")]
    Cancelled,

    #[error("Registry call deadline exceeded")]
    DeadlineExceeded,
}

impl RegistryError {
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Whether repeating the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::DeadlineExceeded)
    }
}

impl From<Interrupted> for RegistryError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => Self::Cancelled,
            Interrupted::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}
