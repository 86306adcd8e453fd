use thiserror::Error;

use crate::request::Operation;

/// A request that cannot be evaluated. Returned to the caller instead of a
/// decision.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request: operation is missing")]
    MissingOperation,

    #[error("malformed request: invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("malformed request: {} requires an incoming snapshot", .operation.as_str())]
    MissingIncoming { operation: Operation },

    #[error("malformed request: identity must not be empty")]
    EmptyIdentity,
}

/// Errors raised while evaluating a rule. Every variant resolves to a deny.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("no rule matched {path}")]
    NoRuleMatched { path: String },

    #[error("lookup failed for {path}: {reason}")]
    LookupFailed { path: String, reason: String },

    #[error("lookup budget of {limit} exceeded")]
    LookupLimit { limit: usize },

    #[error("field '{field}' is missing")]
    MissingField { field: String },

    #[error("cannot read '{field}' of null")]
    NullAccess { field: String },

    #[error("type mismatch: {0}")]
    Type(String),

    #[error("integer overflow")]
    Overflow,

    #[error("evaluation timed out after {millis}ms")]
    Timeout { millis: u64 },
}

/// Failure of a [`LookupResolver`](crate::LookupResolver) call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LookupError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("lookup backend unavailable: {0}")]
    Unavailable(String),
}

/// Error in a condition expression, reported at load time.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}
