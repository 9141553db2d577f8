//! Status listener that reports request outcomes.

use request_outbox::{RequestError, RequestId, StatusListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Logs each terminal outcome and prints a line per request.
#[derive(Default)]
pub struct ConsoleStatusListener {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl ConsoleStatusListener {
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

impl StatusListener for ConsoleStatusListener {
    fn on_success(&self, id: &RequestId, message: &str) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        info!(request_id = %id, message, "Request delivered");
        println!("delivered {id}: {message}");
    }

    fn on_error(&self, id: &RequestId, error: &RequestError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        warn!(request_id = %id, error = %error, "Request failed");
        println!("failed {id}: {error}");
    }
}
