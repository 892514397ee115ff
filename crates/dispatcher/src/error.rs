//! Dispatcher error types

use contracts::{ContractError, FatalSignal};
use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Session, connection or transaction failure raised by a collaborator
    #[error("resource error: {0}")]
    Resource(#[from] ContractError),

    /// Fatal signal raised by the endpoint, returned unmodified
    #[error(transparent)]
    Fatal(#[from] FatalSignal),

    /// Broken invariant or collaborator contract inside a cycle
    #[error("internal error: {message}")]
    Internal { message: String },

    /// Dispatcher cannot be built from the given configuration
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl DispatchError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, DispatchError>;
