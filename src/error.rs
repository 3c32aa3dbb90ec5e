/// Error types for QueryProxy
///
/// Each layer has its own error enum. Proxy operations surface `ProxyError`,
/// which wraps the backing store and expression errors unchanged so callers can
/// tell a lost connection from a malformed filter.

use thiserror::Error;

/// Failure while lexing or parsing a filter expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string starting at position {pos}")]
    UnterminatedString { pos: usize },

    #[error("expected {expected}, found {found}")]
    Expected { expected: String, found: String },

    #[error("unexpected input after expression: {found}")]
    TrailingInput { found: String },
}

/// Failure reported by a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The connection to the store is not available.
    #[error("backing store is unavailable")]
    Unavailable,

    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("entity '{entity}' has no column '{column}'")]
    UnknownColumn { entity: String, column: String },

    #[error("entity '{entity}' has no relationship '{relationship}'")]
    UnknownRelationship { entity: String, relationship: String },

    /// Ordering by a related column without joining the relationship.
    #[error("relationship '{0}' is not joined in this query")]
    NotJoined(String),

    #[error("invalid value for '{entity}.{column}': {reason}")]
    InvalidValue {
        entity: String,
        column: String,
        reason: String,
    },

    #[error("invalid fixture: {0}")]
    InvalidFixture(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a model proxy operation.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid filter expression: {0}")]
    Expr(#[from] ExprError),

    #[error("invalid proxy options: {0}")]
    InvalidOptions(#[from] serde_json::Error),

    /// A read was issued against a cache generation that has since been discarded.
    #[error("stale cache generation {held}, current generation is {current}")]
    StaleGeneration { held: u64, current: u64 },
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type ProxyResult<T> = Result<T, ProxyError>;
