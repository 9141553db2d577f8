//! Completion routing on a dedicated callback task.

use crate::{
    HandlerResult, OutboxError, OutboxResult, RequestError, RequestId, ResponseModel, ResponseShape,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Side effect applied to successful responses of a matching shape.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    fn name(&self) -> &str;

    fn should_handle(&self, shape: &ResponseShape) -> bool;

    async fn handle(&self, response: &ResponseModel, shape: &ResponseShape) -> HandlerResult<()>;
}

/// Caller-visible outcome callbacks, invoked once per request.
pub trait StatusListener: Send + Sync {
    /// `message` is the response's reason phrase.
    fn on_success(&self, id: &RequestId, message: &str);

    fn on_error(&self, id: &RequestId, error: &RequestError);
}

/// Terminal outcome of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Success { id: RequestId, response: ResponseModel },
    Error { id: RequestId, error: RequestError },
}

impl Completion {
    pub fn id(&self) -> &RequestId {
        match self {
            Self::Success { id, .. } | Self::Error { id, .. } => id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Resolves with the completion of one submitted request, after handlers and
/// the status listener have run.
#[derive(Debug)]
pub struct Receipt {
    id: RequestId,
    rx: oneshot::Receiver<Completion>,
}

impl Receipt {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the terminal outcome.
    ///
    /// Fails with `NoCompletion` if the request was canceled or the
    /// dispatcher stopped before finishing it.
    pub async fn outcome(self) -> OutboxResult<Completion> {
        self.rx.await.map_err(|_| OutboxError::NoCompletion(self.id))
    }
}

type ReceiptMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Completion>>>>;

/// Delivers completions to the handler chain and the status listener.
///
/// Deliveries run one at a time on a task of their own, in the order they
/// were produced. Producers never wait for handlers.
pub struct CompletionRouter {
    tx: Mutex<Option<mpsc::UnboundedSender<Completion>>>,
    receipts: ReceiptMap,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CompletionRouter {
    /// Start the callback task. Must be called inside a tokio runtime.
    pub fn spawn(
        handlers: Vec<Arc<dyn ResponseHandler>>,
        listener: Option<Arc<dyn StatusListener>>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
        let receipts: ReceiptMap = Arc::new(Mutex::new(HashMap::new()));
        let task_receipts = Arc::clone(&receipts);

        let task = tokio::spawn(async move {
            while let Some(completion) = rx.recv().await {
                deliver(&handlers, listener.as_deref(), &completion).await;

                let waiter = task_receipts.lock().remove(completion.id());
                if let Some(waiter) = waiter {
                    let _ = waiter.send(completion);
                }
            }
            debug!("Completion router stopped");
        });

        Self {
            tx: Mutex::new(Some(tx)),
            receipts,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn on_success(&self, id: RequestId, response: ResponseModel) {
        self.dispatch(Completion::Success { id, response });
    }

    pub fn on_error(&self, id: RequestId, error: RequestError) {
        self.dispatch(Completion::Error { id, error });
    }

    /// Report an error for a request that never reached the queue.
    pub fn report_error(&self, id: RequestId, error: RequestError) {
        debug!(request_id = %id, error = %error, "Reporting error for unqueued request");
        self.on_error(id, error);
    }

    fn dispatch(&self, completion: Completion) {
        let sent = match self.tx.lock().as_ref() {
            Some(tx) => tx.send(completion).is_ok(),
            None => false,
        };
        if !sent {
            warn!("Completion dropped: router is shut down");
        }
    }

    /// Receipt for `id`, resolved when its completion has been delivered.
    ///
    /// Returns `None` if a receipt for `id` is already pending.
    pub(crate) fn register_receipt(&self, id: RequestId) -> Option<Receipt> {
        let mut receipts = self.receipts.lock();
        if receipts.contains_key(&id) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        receipts.insert(id.clone(), tx);
        Some(Receipt { id, rx })
    }

    /// Drop pending receipts; their waiters get `NoCompletion`.
    pub(crate) fn forget_receipts(&self, ids: &[RequestId]) {
        let mut receipts = self.receipts.lock();
        for id in ids {
            receipts.remove(id);
        }
    }

    /// Stop accepting completions and wait for queued deliveries to finish.
    pub async fn shutdown(&self) {
        self.tx.lock().take();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Completion router task failed");
            }
        }
        self.receipts.lock().clear();
    }
}

async fn deliver(
    handlers: &[Arc<dyn ResponseHandler>],
    listener: Option<&dyn StatusListener>,
    completion: &Completion,
) {
    match completion {
        Completion::Success { id, response } => {
            let shape = response.shape();
            for handler in handlers {
                if !handler.should_handle(&shape) {
                    continue;
                }
                match handler.handle(response, &shape).await {
                    Ok(()) => debug!(request_id = %id, handler = handler.name(), "Handler applied"),
                    Err(e) => warn!(
                        request_id = %id,
                        handler = handler.name(),
                        error = %e,
                        "Response handler failed"
                    ),
                }
            }
            if let Some(listener) = listener {
                listener.on_success(id, &response.message);
            }
        }
        Completion::Error { id, error } => {
            if let Some(listener) = listener {
                listener.on_error(id, error);
            }
        }
    }
}
