//! Outbox error types.

use crate::RequestId;
use thiserror::Error;

/// Outbox error type.
///
/// These surface at the call site of a queue or dispatcher operation. They
/// are never retried by this crate.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Storage failure; the operation did not take effect.
    #[error("Storage error: {0}")]
    Storage(#[from] engage_database::DatabaseError),

    /// A record with this id is already queued.
    #[error("Duplicate request id: {0}")]
    DuplicateRequest(RequestId),

    /// Stored row could not be turned back into a record.
    #[error("Invalid stored request {0}: {1}")]
    InvalidRecord(String, String),

    /// `start()` was called twice.
    #[error("Dispatcher already started")]
    AlreadyStarted,

    /// The receipt's completion will never arrive (canceled or dispatcher stopped).
    #[error("No completion for request {0}")]
    NoCompletion(RequestId),

    /// HTTP client construction error
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Terminal failure of a single request, as seen by the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The server answered with a non-2xx status.
    #[error("Request rejected with status {status_code}: {message}")]
    Rejected {
        status_code: u16,
        message: String,
        body: String,
    },

    /// Transport failure that is not a connectivity problem.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request was malformed before it could be sent.
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// The record outlived its time-to-live while queued.
    #[error("Request expired after {age_ms}ms (ttl {ttl_ms}ms)")]
    Expired { age_ms: i64, ttl_ms: i64 },

    /// Connectivity failures exhausted the retry horizon.
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Error raised by a response handler. Logged, never propagated.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The body did not have the shape the handler expected.
    #[error("Unexpected response body: {0}")]
    UnexpectedBody(String),

    /// Persisting the handler's side effect failed.
    #[error("Storage error: {0}")]
    Storage(#[from] engage_database::DatabaseError),

    /// The presenter refused or failed to show content.
    #[error("Presentation failed: {0}")]
    Presentation(String),
}

/// Result type alias using HandlerError.
pub type HandlerResult<T> = Result<T, HandlerError>;
