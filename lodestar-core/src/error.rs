//! Error types for server selection.
//!
//! Selection itself never fails because nothing matched; an empty candidate list
//! is an ordinary outcome. Errors are reserved for inputs that can never produce
//! a correct answer, such as a read preference that contradicts itself.

use thiserror::Error;

/// Result type for selection operations
pub type Result<T> = std::result::Result<T, SelectionError>;

/// Errors raised while building selection inputs or running selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// An argument or combination of arguments is not allowed.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the argument.
        message: String,
    },
}

impl SelectionError {
    /// Create an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Whether retrying the same call could succeed.
    ///
    /// Invalid arguments stay invalid no matter how often the topology changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidArgument { .. } => false,
        }
    }
}
