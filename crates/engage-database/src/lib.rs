//! SQLite persistence layer for the engage outbox.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Versioned database migrations
//! - Model types for the request queue, displayed campaigns and key-value state
//! - Standalone query helpers that work with any `Connection`
//!
//! # Architecture
//!
//! The `AsyncDatabase` uses a single dedicated thread for all SQLite operations.
//! Queries are sent through a channel and executed in FIFO order, which gives
//! the request queue and the identity storage the same serialization
//! guarantees no matter which task issues the query.
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let oldest = db.call(|conn| queries::get_oldest_request(conn)).await?;
//! ```
//!
//! **Important**: Only SQL operations should run inside `db.call()`.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::*;
