//! Monitor and timed-selection errors.

use lodestar_core::{SelectionError, ServerAddress};
use thiserror::Error;

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors raised by the heartbeat monitor and by waiting selectors.
#[derive(Debug, Clone, Error)]
pub enum MonitorError {
    /// Selection inputs can never be satisfied.
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// No suitable server appeared before the selection timeout.
    #[error("server selection timed out after {timeout_ms}ms: {message}")]
    ServerSelectionTimeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
        /// What was being selected and what the topology looked like.
        message: String,
    },

    /// The selection settings were rejected.
    #[error("invalid selection config: {message}")]
    Config {
        /// Why the settings were rejected.
        message: String,
    },

    /// A heartbeat could not be completed.
    #[error("heartbeat to {address} failed: {message}")]
    Heartbeat {
        /// The server that was probed.
        address: ServerAddress,
        /// Why the probe failed.
        message: String,
    },
}

impl MonitorError {
    /// Create a heartbeat error.
    pub fn heartbeat(address: ServerAddress, message: impl Into<String>) -> Self {
        Self::Heartbeat {
            address,
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the same call may succeed later against a changed topology.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Selection(err) => err.is_retryable(),
            Self::Config { .. } => false,
            Self::ServerSelectionTimeout { .. } | Self::Heartbeat { .. } => true,
        }
    }
}
