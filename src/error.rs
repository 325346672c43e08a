//! Error types for the flood control service.

use std::fmt;

use thiserror::Error;

use crate::floodcontrol::{Identity, PayloadError};
use crate::store::StoreError;

/// The store operation that was in flight when an infrastructure error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Loading a call record
    Read,
    /// Persisting a call record
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => f.write_str("read"),
            Operation::Write => f.write_str("write"),
        }
    }
}

/// Main error type for flood control operations.
#[derive(Error, Debug)]
pub enum FloodControlError {
    /// Invalid limiter or application configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The identity exceeded its allowed number of calls in the current window
    #[error("Call limit exceeded for identity {identity}")]
    LimitExceeded { identity: Identity },

    /// The state store failed to serve a read or write
    #[error("Failed to {operation} call record for identity {identity}: {source}")]
    Store {
        operation: Operation,
        identity: Identity,
        #[source]
        source: StoreError,
    },

    /// A call record could not be encoded or the stored payload could not be decoded
    #[error("Failed to {operation} call record for identity {identity}: {source}")]
    Payload {
        operation: Operation,
        identity: Identity,
        #[source]
        source: PayloadError,
    },
}

impl FloodControlError {
    /// Whether this is the deliberate "flood detected" outcome.
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, FloodControlError::LimitExceeded { .. })
    }

    /// Whether no decision could be made because the store or payload failed.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            FloodControlError::Store { .. } | FloodControlError::Payload { .. }
        )
    }
}

impl From<config::ConfigError> for FloodControlError {
    fn from(err: config::ConfigError) -> Self {
        FloodControlError::Config(err.to_string())
    }
}

/// Result type alias for flood control operations.
pub type Result<T> = std::result::Result<T, FloodControlError>;
