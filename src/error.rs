//! Error taxonomy surfaced by every core operation.
//!
//! Logical failures (validation, condition failures, cancellation) surface
//! immediately; transient backend failures are retried internally and only
//! reach the caller as `Internal` once the retry budget is exhausted.

use serde::{Deserialize, Serialize};

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, PdbError>;

/// Why a single entry of a `TransactWriteItems` call was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationCode {
    ConditionalCheckFailed,
    ValidationError,
    ItemCollectionSizeLimitExceeded,
}

/// Per-item cancellation reason returned with `TransactionCanceled`.
///
/// Entries align with the request order; items that did not cause the
/// cancellation carry `code: None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationReason {
    pub code: Option<CancellationCode>,
    pub message: Option<String>,
}

impl CancellationReason {
    /// Reason for an item that passed its checks.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn failed(code: CancellationCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: Some(message.into()),
        }
    }
}

/// Errors that can occur during any PretenderDB operation.
#[derive(Debug, thiserror::Error)]
pub enum PdbError {
    /// Shape or type violation: missing keys, wrong key attribute type,
    /// malformed expression, placeholder mismatch, duplicate keys in a
    /// transaction or batch.
    #[error("validation error: {0}")]
    Validation(String),

    /// A `ConditionExpression` evaluated to false on a single-item write.
    #[error("conditional check failed: {0}")]
    ConditionalCheckFailed(String),

    /// A transaction aborted; `reasons` aligns with the request item order.
    #[error("transaction canceled")]
    TransactionCanceled { reasons: Vec<CancellationReason> },

    /// No such table or index.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Operation on a table in an invalid state.
    #[error("resource in use: {0}")]
    ResourceInUse(String),

    /// Create on a table that already exists.
    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    /// Item or item collection exceeded a size guard.
    #[error("item collection size limit exceeded: {0}")]
    ItemCollectionSizeLimitExceeded(String),

    /// The per-operation deadline elapsed.
    #[error("request timed out")]
    RequestTimeout,

    /// Backend I/O failure that survived the internal retry budget.
    #[error("internal error: {0}")]
    Internal(String),

    /// Transient backend failure (deadlock, serialization conflict, write
    /// contention). Retried internally; demoted to `Internal` before it
    /// ever reaches a caller.
    #[error("transient backend error: {0}")]
    Transient(String),
}

impl PdbError {
    /// Wire-level error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            PdbError::Validation(_) => "ValidationError",
            PdbError::ConditionalCheckFailed(_) => "ConditionalCheckFailed",
            PdbError::TransactionCanceled { .. } => "TransactionCanceled",
            PdbError::ResourceNotFound(_) => "ResourceNotFound",
            PdbError::ResourceInUse(_) => "ResourceInUse",
            PdbError::TableAlreadyExists(_) => "TableAlreadyExists",
            PdbError::ItemCollectionSizeLimitExceeded(_) => "ItemCollectionSizeLimitExceeded",
            PdbError::RequestTimeout => "RequestTimeout",
            PdbError::Internal(_) | PdbError::Transient(_) => "InternalError",
        }
    }

    /// Whether the internal retry loop should try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, PdbError::Transient(_))
    }

    /// Collapse `Transient` into `Internal` once the retry budget is spent.
    pub fn demote_transient(self) -> Self {
        match self {
            PdbError::Transient(msg) => PdbError::Internal(msg),
            other => other,
        }
    }

    /// Convenience constructor for validation failures.
    pub fn validation(msg: impl Into<String>) -> Self {
        PdbError::Validation(msg.into())
    }

    /// Per-item cancellation reasons, when this is `TransactionCanceled`.
    pub fn cancellation_reasons(&self) -> Option<&[CancellationReason]> {
        match self {
            PdbError::TransactionCanceled { reasons } => Some(reasons),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for PdbError {
    fn from(err: sqlx::Error) -> Self {
        if is_transient(&err) {
            PdbError::Transient(err.to_string())
        } else {
            PdbError::Internal(err.to_string())
        }
    }
}

impl From<serde_json::Error> for PdbError {
    fn from(err: serde_json::Error) -> Self {
        PdbError::Internal(format!("payload serialization: {err}"))
    }
}

/// Whether a backend error is worth retrying with backoff.
///
/// Serialization failures (`40001`), deadlocks (`40P01`) and SQLite write
/// contention (`SQLITE_BUSY` / `database is locked`) clear on retry; anything
/// else is treated as fatal.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("40001") | Some("40P01") | Some("5") | Some("517") => true,
            _ => db.message().contains("database is locked"),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(PdbError::validation("x").code(), "ValidationError");
        assert_eq!(
            PdbError::ConditionalCheckFailed("c".into()).code(),
            "ConditionalCheckFailed"
        );
        assert_eq!(
            PdbError::TransactionCanceled { reasons: vec![] }.code(),
            "TransactionCanceled"
        );
        assert_eq!(PdbError::RequestTimeout.code(), "RequestTimeout");
    }

    #[test]
    fn test_cancellation_reason_none_has_no_code() {
        let reason = CancellationReason::none();
        assert!(reason.code.is_none());
        assert!(reason.message.is_none());
    }
}
