//! Offline-tolerant outbound request queue.
//!
//! This crate provides:
//! - RequestRecord: immutable description of one pending HTTP call
//! - RequestQueue: durable FIFO of records backed by SQLite
//! - ConnectivityMonitor: reachability state fed by a ConnectivitySource
//! - RequestManager: single sequential worker draining the queue
//! - CompletionRouter: delivers terminal outcomes to response handlers and the
//!   status listener on a dedicated callback task
//! - HttpTransport: reqwest-backed Transport with outcome classification
//!
//! ```text
//! submit ──▶ RequestQueue (SQLite) ──▶ worker ──▶ Transport
//!                  ▲                     │
//!                  │              Completion ──▶ CompletionRouter task
//!         ConnectivityMonitor            │        ├─▶ ResponseHandler chain
//!         (wakes the worker)             │        ├─▶ StatusListener
//!                                        │        └─▶ Receipt
//! ```

mod connectivity;
mod error;
mod manager;
mod queue;
mod record;
mod response;
mod router;
mod transport;

pub use connectivity::{
    ConnectivityListener, ConnectivityMonitor, ConnectivitySource, ConnectivityState,
    ManualConnectivitySource, SubscriptionId,
};
pub use error::{HandlerError, HandlerResult, OutboxError, OutboxResult, RequestError};
pub use manager::{DispatcherState, RequestManager, RetryPolicy};
pub use queue::RequestQueue;
pub use record::{HttpMethod, RequestId, RequestRecord};
pub use response::{Identity, InAppMessage, ResponseModel, ResponseShape};
pub use router::{Completion, CompletionRouter, Receipt, ResponseHandler, StatusListener};
pub use transport::{basic_auth_header, HttpTransport, SendOutcome, Transport};
