//! Client error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Queue or dispatcher error
    #[error("Outbox error: {0}")]
    Outbox(#[from] request_outbox::OutboxError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] engage_database::DatabaseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Endpoint URL could not be built
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using ClientError.
pub type ClientResult<T> = Result<T, ClientError>;
