use discovery_core::{Interrupted, RegistryError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Service discovery failed: {0}")]
    DiscoveryFailure(#[source] RegistryError),

    #[error("No healthy instances of downstream service: {0}")]
    DownstreamUnavailable(String),

    #[error("Not found")]
    NotFound,

    #[error("Upstream responded with status {status}: {message}")]
    UpstreamError { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Transport error calling {address}: {message}")]
    Transport { address: String, message: String },

    #[error("Circuit open for service: {0}")]
    CircuitOpen(String),

    #[error("Gateway call cancelled")]
    Cancelled,

    #[error("Gateway call deadline exceeded")]
    DeadlineExceeded,
}

impl GatewayError {
    /// Map a failed address lookup onto the gateway taxonomy.
    pub fn from_registry(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(service) => Self::DownstreamUnavailable(service),
            RegistryError::Cancelled => Self::Cancelled,
            RegistryError::DeadlineExceeded => Self::DeadlineExceeded,
            other => Self::DiscoveryFailure(other),
        }
    }

    /// Stable label for logs and metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DiscoveryFailure(_) => "discovery_failure",
            Self::DownstreamUnavailable(_) => "downstream_unavailable",
            Self::NotFound => "not_found",
            Self::UpstreamError { .. } => "upstream_error",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Transport { .. } => "transport",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }

    /// Failures a retry with a fresh lookup can fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DiscoveryFailure(e) => e.is_retryable(),
            Self::Transport { .. } => true,
            _ => false,
        }
    }
}

impl From<Interrupted> for GatewayError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => Self::Cancelled,
            Interrupted::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}
