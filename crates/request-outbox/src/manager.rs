//! Sequential request dispatcher.

use crate::record::ttl_millis;
use crate::{
    Completion, CompletionRouter, ConnectivityMonitor, ConnectivityState, OutboxError,
    OutboxResult, Receipt, RequestError, RequestId, RequestQueue, RequestRecord, SendOutcome,
    Transport,
};
use engage_config_and_utils::RetrySettings;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Retry horizon for connectivity failures.
///
/// Backoff follows `base * 2^(attempt - 1)` capped at `backoff_max`. With the
/// defaults (2s base, 300s cap):
///
/// | Attempt | Delay |
/// |---------|-------|
/// | 1       | 2s    |
/// | 2       | 4s    |
/// | 3       | 8s    |
/// | 8+      | 300s  |
///
/// A record is given up after `max_attempts` consecutive retriable failures,
/// or once it is older than `max_age`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_attempts: u32,
    pub max_age: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(300),
            max_attempts: 20,
            max_age: None,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            backoff_max: Duration::from_millis(settings.backoff_max_ms),
            max_attempts: settings.max_attempts.max(1),
            max_age: settings.max_age_secs.map(Duration::from_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try after `attempt` failures. Zero for zero.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = u64::try_from(self.backoff_base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.backoff_max.as_millis()).unwrap_or(u64::MAX);
        let multiplier = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(multiplier).min(max_ms))
    }

    /// Whether a record that failed `attempts` times and is `age` old should
    /// be given up.
    pub fn is_exhausted(&self, attempts: u32, age: Duration) -> bool {
        attempts >= self.max_attempts || self.max_age.is_some_and(|max_age| age > max_age)
    }
}

/// Where the worker is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Nothing to do: queue empty or offline.
    Idle,
    Sending,
    CompletingSuccess,
    CompletingError,
    /// Head record failed on connectivity; waiting for backoff or reconnect.
    WaitingForRetry,
    Stopped,
}

/// Drains the request queue one record at a time.
///
/// Lifecycle:
/// 1. Create with [`RequestManager::new()`]
/// 2. Call [`RequestManager::start()`] to spawn the worker
/// 3. Submit records with [`RequestManager::submit()`] from any task
/// 4. Call [`RequestManager::shutdown()`] to stop after the in-flight request
///
/// Submitting only waits for the local insert. Records queued before
/// `start()` (or left over from a previous run) are sent once the worker runs.
pub struct RequestManager {
    queue: RequestQueue,
    transport: Arc<dyn Transport>,
    monitor: Arc<ConnectivityMonitor>,
    router: Arc<CompletionRouter>,
    policy: RetryPolicy,
    wake: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    state_tx: Arc<watch::Sender<DispatcherState>>,
    in_flight: Arc<Mutex<Option<RequestId>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl RequestManager {
    pub fn new(
        queue: RequestQueue,
        transport: Arc<dyn Transport>,
        monitor: Arc<ConnectivityMonitor>,
        router: Arc<CompletionRouter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            transport,
            monitor,
            router,
            policy,
            wake: Arc::new(Notify::new()),
            shutdown_tx: watch::Sender::new(false),
            state_tx: Arc::new(watch::Sender::new(DispatcherState::Idle)),
            in_flight: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the worker task.
    pub fn start(&self) -> OutboxResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(OutboxError::AlreadyStarted);
        }

        let worker = Worker {
            queue: self.queue.clone(),
            transport: Arc::clone(&self.transport),
            monitor: Arc::clone(&self.monitor),
            router: Arc::clone(&self.router),
            policy: self.policy.clone(),
            wake: Arc::clone(&self.wake),
            state_tx: Arc::clone(&self.state_tx),
            in_flight: Arc::clone(&self.in_flight),
        };
        let handle = tokio::spawn(worker.run(self.shutdown_tx.subscribe()));
        *self.worker.lock() = Some(handle);

        info!(
            max_attempts = self.policy.max_attempts,
            backoff_base_ms = self.policy.backoff_base.as_millis() as u64,
            "Request dispatcher started"
        );
        Ok(())
    }

    /// Queue a record and wake the worker.
    pub async fn submit(&self, record: RequestRecord) -> OutboxResult<RequestId> {
        self.queue.enqueue(&record).await?;
        self.wake.notify_one();
        info!(request_id = %record.id(), url = %record.url(), "Request submitted");
        Ok(record.id().clone())
    }

    /// Queue a record and get a receipt for its terminal outcome.
    pub async fn submit_tracked(&self, record: RequestRecord) -> OutboxResult<Receipt> {
        let id = record.id().clone();
        let receipt = self
            .router
            .register_receipt(id.clone())
            .ok_or_else(|| OutboxError::DuplicateRequest(id.clone()))?;

        if let Err(e) = self.submit(record).await {
            self.router.forget_receipts(&[id]);
            return Err(e);
        }
        Ok(receipt)
    }

    /// Remove queued records matching `predicate`. The in-flight request, if
    /// any, is never removed.
    pub async fn cancel_matching<P>(&self, mut predicate: P) -> OutboxResult<Vec<RequestId>>
    where
        P: FnMut(&RequestRecord) -> bool + Send + 'static,
    {
        let in_flight = Arc::clone(&self.in_flight);
        let canceled = self
            .queue
            .remove_matching(move |record| {
                let sending = in_flight.lock().as_ref() == Some(record.id());
                !sending && predicate(record)
            })
            .await?;

        self.router.forget_receipts(&canceled);
        if !canceled.is_empty() {
            info!(count = canceled.len(), "Canceled queued requests");
        }
        Ok(canceled)
    }

    /// Stop the worker after the in-flight request, then drain the router.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Dispatcher worker panicked");
            }
        }
        self.router.shutdown().await;
        self.state_tx.send_replace(DispatcherState::Stopped);
        info!("Request dispatcher stopped");
    }

    pub fn state(&self) -> DispatcherState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<DispatcherState> {
        self.state_tx.subscribe()
    }

    pub async fn pending_count(&self) -> OutboxResult<usize> {
        self.queue.len().await
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn router(&self) -> &Arc<CompletionRouter> {
        &self.router
    }

}

/// State owned by the worker task.
struct Worker {
    queue: RequestQueue,
    transport: Arc<dyn Transport>,
    monitor: Arc<ConnectivityMonitor>,
    router: Arc<CompletionRouter>,
    policy: RetryPolicy,
    wake: Arc<Notify>,
    state_tx: Arc<watch::Sender<DispatcherState>>,
    in_flight: Arc<Mutex<Option<RequestId>>>,
}

impl Worker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut connectivity_rx = self.monitor.subscribe();
        // Consecutive retriable failures of the current head record.
        let mut retries: Option<(RequestId, u32)> = None;
        // Head whose outcome was delivered but whose row could not be deleted.
        let mut undeleted: Option<RequestId> = None;

        while !should_stop(&shutdown_rx) {
            let head = self.queue.peek_oldest().await;
            let head_id = match &head {
                Ok(Some(record)) => Some(record.id().clone()),
                Err(OutboxError::InvalidRecord(id, _)) => Some(RequestId::from(id.as_str())),
                _ => None,
            };
            let read_failed =
                matches!(&head, Err(e) if !matches!(e, OutboxError::InvalidRecord(..)));
            if !read_failed {
                if let Some(pending) = undeleted.take() {
                    if head_id.as_ref() == Some(&pending) {
                        self.retry_remove(pending, &mut undeleted, &mut shutdown_rx).await;
                        continue;
                    }
                }
            }

            let record = match head {
                Ok(Some(record)) => record,
                Ok(None) => {
                    self.set_state(DispatcherState::Idle);
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = shutdown_signal(&mut shutdown_rx) => {}
                    }
                    continue;
                }
                Err(OutboxError::InvalidRecord(id, reason)) => {
                    warn!(request_id = %id, reason = %reason, "Dropping undecodable request");
                    self.set_state(DispatcherState::CompletingError);
                    let completion = Completion::Error {
                        id: RequestId::from(id),
                        error: RequestError::Invalid(reason),
                    };
                    self.finish(completion, &mut undeleted, &mut shutdown_rx).await;
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read request queue");
                    self.pause(self.policy.backoff_base, &mut shutdown_rx).await;
                    continue;
                }
            };

            let id = record.id().clone();
            let now = chrono::Utc::now().timestamp_millis();

            if let Some(ttl) = record.ttl().filter(|_| record.is_expired(now)) {
                retries = None;
                warn!(request_id = %id, "Request expired before sending");
                let error = RequestError::Expired {
                    age_ms: record.age_ms(now),
                    ttl_ms: ttl_millis(ttl),
                };
                self.set_state(DispatcherState::CompletingError);
                self.finish(Completion::Error { id, error }, &mut undeleted, &mut shutdown_rx)
                    .await;
                continue;
            }

            if !self.monitor.is_reachable() {
                self.set_state(DispatcherState::Idle);
                debug!(request_id = %id, "Offline, holding queue");
                tokio::select! {
                    _ = wait_until_reachable(&mut connectivity_rx) => {}
                    _ = shutdown_signal(&mut shutdown_rx) => {}
                }
                continue;
            }

            // Claim the record, then make sure it was not canceled meanwhile.
            *self.in_flight.lock() = Some(id.clone());
            match self.queue.contains(&id).await {
                Ok(true) => {}
                Ok(false) => {
                    self.in_flight.lock().take();
                    continue;
                }
                Err(e) => {
                    self.in_flight.lock().take();
                    error!(request_id = %id, error = %e, "Failed to read request queue");
                    self.pause(self.policy.backoff_base, &mut shutdown_rx).await;
                    continue;
                }
            }

            self.set_state(DispatcherState::Sending);
            let outcome = self.transport.send(&record).await;

            match outcome {
                SendOutcome::Success(response) => {
                    retries = None;
                    self.set_state(DispatcherState::CompletingSuccess);
                    info!(request_id = %id, status = response.status_code, "Request succeeded");
                    let completion = Completion::Success { id, response };
                    self.finish(completion, &mut undeleted, &mut shutdown_rx).await;
                }
                SendOutcome::Rejected(response) => {
                    retries = None;
                    warn!(request_id = %id, status = response.status_code, "Request rejected");
                    let error = RequestError::Rejected {
                        status_code: response.status_code,
                        message: response.message,
                        body: response.body,
                    };
                    self.set_state(DispatcherState::CompletingError);
                    self.finish(Completion::Error { id, error }, &mut undeleted, &mut shutdown_rx)
                        .await;
                }
                SendOutcome::Failed(cause) => {
                    retries = None;
                    warn!(request_id = %id, error = %cause, "Request failed");
                    self.set_state(DispatcherState::CompletingError);
                    let error = RequestError::Transport(cause);
                    self.finish(Completion::Error { id, error }, &mut undeleted, &mut shutdown_rx)
                        .await;
                }
                SendOutcome::Retriable(cause) => {
                    let attempts = match &retries {
                        Some((retried, count)) if retried == &id => count + 1,
                        _ => 1,
                    };
                    let age = Duration::from_millis(u64::try_from(record.age_ms(now)).unwrap_or(0));

                    if self.policy.is_exhausted(attempts, age) {
                        retries = None;
                        warn!(request_id = %id, attempts, error = %cause, "Retries exhausted");
                        let error = RequestError::RetriesExhausted {
                            attempts,
                            last_error: cause,
                        };
                        self.set_state(DispatcherState::CompletingError);
                        self.finish(Completion::Error { id, error }, &mut undeleted, &mut shutdown_rx)
                            .await;
                        continue;
                    }

                    self.in_flight.lock().take();
                    let delay = self.policy.backoff(attempts);
                    warn!(
                        request_id = %id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %cause,
                        "Request failed on connectivity, will retry"
                    );
                    retries = Some((id, attempts));

                    // Only transitions after this point count as a reconnect.
                    connectivity_rx.borrow_and_update();
                    self.set_state(DispatcherState::WaitingForRetry);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = wait_for_reconnect(&mut connectivity_rx) => {
                            info!("Connectivity restored, retrying");
                        }
                        _ = shutdown_signal(&mut shutdown_rx) => {}
                    }
                }
            }
        }

        self.set_state(DispatcherState::Stopped);
        debug!("Dispatcher worker exited");
    }

    fn set_state(&self, state: DispatcherState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Delete a finished record, then deliver its completion exactly once.
    ///
    /// When the delete fails the id is parked in `undeleted`: the record is
    /// neither sent nor reported again while the delete is retried.
    async fn finish(
        &self,
        completion: Completion,
        undeleted: &mut Option<RequestId>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        let id = completion.id().clone();
        let removed = self.queue.remove(&id).await;
        self.in_flight.lock().take();

        match completion {
            Completion::Success { id, response } => self.router.on_success(id, response),
            Completion::Error { id, error } => self.router.on_error(id, error),
        }

        if let Err(e) = removed {
            error!(request_id = %id, error = %e, "Failed to remove finished request");
            *undeleted = Some(id);
            self.pause(self.policy.backoff_base, shutdown_rx).await;
        }
    }

    /// Retry the delete of a record whose outcome was already delivered.
    async fn retry_remove(
        &self,
        id: RequestId,
        undeleted: &mut Option<RequestId>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        match self.queue.remove(&id).await {
            Ok(_) => debug!(request_id = %id, "Removed finished request on retry"),
            Err(e) => {
                error!(request_id = %id, error = %e, "Still unable to remove finished request");
                *undeleted = Some(id);
                self.pause(self.policy.backoff_base, shutdown_rx).await;
            }
        }
    }

    async fn pause(&self, delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) {
        self.set_state(DispatcherState::WaitingForRetry);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_signal(shutdown_rx) => {}
        }
    }
}

/// A dropped manager counts as a shutdown request.
fn should_stop(shutdown_rx: &watch::Receiver<bool>) -> bool {
    *shutdown_rx.borrow() || shutdown_rx.has_changed().is_err()
}

async fn shutdown_signal(shutdown_rx: &mut watch::Receiver<bool>) {
    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

async fn wait_until_reachable(rx: &mut watch::Receiver<ConnectivityState>) {
    loop {
        if rx.borrow_and_update().is_reachable() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Resolves on the next transition that ends in `Reachable`.
async fn wait_for_reconnect(rx: &mut watch::Receiver<ConnectivityState>) {
    loop {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if rx.borrow_and_update().is_reachable() {
            return;
        }
    }
}
