//! Core error model.

use thiserror::Error;

/// Result type used by the core primitives.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while constructing or checking core primitives.
///
/// Business-rule failures are not errors at this level; they are terminal
/// outcomes carried as plain reasons by the rules layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier was invalid (e.g. parse failure, empty string).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// An append landed at a different log position than expected.
    #[error("position conflict: expected {expected}, log is at {current}")]
    PositionConflict { expected: u64, current: u64 },
}

impl CoreError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
