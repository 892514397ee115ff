//! Layered error definitions
//!
//! Categorized by source: config / session / transaction / endpoint

use thiserror::Error;

/// Unified collaborator error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Session Errors =====
    /// The session was used outside its delivery scope
    #[error("session unavailable: {message}")]
    SessionUnavailable { message: String },

    /// Operation the wrapped resource refuses to perform
    #[error("operation not supported: {operation}")]
    NotSupported { operation: String },

    /// Broker-side resource failure (delete, unlock, connection clone ...)
    #[error("resource error during {operation}: {message}")]
    Resource { operation: String, message: String },

    // ===== Transaction Errors =====
    /// Transaction manager or XA protocol failure
    #[error("transaction error: {message}")]
    Transaction { message: String },

    // ===== Endpoint Errors =====
    /// Container-side endpoint failure (creation, before/after delivery)
    #[error("endpoint error: {message}")]
    Endpoint { message: String },

    /// A collaborator does not honour the expected contract
    #[error("contract violation: {message}")]
    ContractViolation { message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create session unavailable error
    pub fn session_unavailable(message: impl Into<String>) -> Self {
        Self::SessionUnavailable {
            message: message.into(),
        }
    }

    /// Create not supported error
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    /// Create resource error
    pub fn resource(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resource {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create endpoint error
    pub fn endpoint(message: impl Into<String>) -> Self {
        Self::Endpoint {
            message: message.into(),
        }
    }

    /// Create contract violation error
    pub fn contract_violation(message: impl Into<String>) -> Self {
        Self::ContractViolation {
            message: message.into(),
        }
    }

    /// True for the error raised by a closed delivery scope
    pub fn is_session_unavailable(&self) -> bool {
        matches!(self, Self::SessionUnavailable { .. })
    }
}
