#![allow(dead_code)]

use async_trait::async_trait;
use engage_database::AsyncDatabase;
use parking_lot::Mutex;
use request_outbox::{
    CompletionRouter, ConnectivityMonitor, ManualConnectivitySource, RequestError, RequestId,
    RequestManager, RequestQueue, RequestRecord, ResponseHandler, ResponseModel, RetryPolicy,
    SendOutcome, StatusListener, Transport,
};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Scripted reply of the fake transport.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(&'static str),
    Status(u16, &'static str),
    Offline,
    Broken,
}

/// Transport that replays a script and records what it was asked to send.
pub struct FakeTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    sent: Mutex<Vec<RequestId>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    latency: Duration,
}

impl FakeTransport {
    pub fn new(fallback: Reply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            sent: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            latency: Duration::from_millis(2),
        }
    }

    pub fn ok() -> Self {
        Self::new(Reply::Ok("{}"))
    }

    pub fn then(self, reply: Reply) -> Self {
        self.script.lock().push_back(reply);
        self
    }

    pub fn sent(&self) -> Vec<RequestId> {
        self.sent.lock().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, record: &RequestRecord) -> SendOutcome {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.sent.lock().push(record.id().clone());

        tokio::time::sleep(self.latency).await;
        let reply = self.script.lock().pop_front().unwrap_or_else(|| self.fallback.clone());
        self.active.fetch_sub(1, Ordering::SeqCst);

        match reply {
            Reply::Ok(body) => SendOutcome::Success(ResponseModel::new(record.id().clone(), 200, body)),
            Reply::Status(code, body) => {
                SendOutcome::Rejected(ResponseModel::new(record.id().clone(), code, body))
            }
            Reply::Offline => SendOutcome::Retriable("connection refused".to_string()),
            Reply::Broken => SendOutcome::Failed("invalid header value".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Success(RequestId, String),
    Error(RequestId, RequestError),
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Status>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<Status> {
        self.events.lock().clone()
    }
}

impl StatusListener for RecordingListener {
    fn on_success(&self, id: &RequestId, message: &str) {
        self.events.lock().push(Status::Success(id.clone(), message.to_string()));
    }

    fn on_error(&self, id: &RequestId, error: &RequestError) {
        self.events.lock().push(Status::Error(id.clone(), error.clone()));
    }
}

pub struct Harness {
    pub db: AsyncDatabase,
    pub manager: RequestManager,
    pub transport: Arc<FakeTransport>,
    pub connectivity: Arc<ManualConnectivitySource>,
    pub listener: Arc<RecordingListener>,
}

pub struct HarnessBuilder {
    db: Option<AsyncDatabase>,
    transport: FakeTransport,
    online: bool,
    policy: RetryPolicy,
    handlers: Vec<Arc<dyn ResponseHandler>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            db: None,
            transport: FakeTransport::ok(),
            online: true,
            policy: RetryPolicy {
                backoff_base: Duration::from_millis(10),
                backoff_max: Duration::from_millis(50),
                ..RetryPolicy::default()
            },
            handlers: Vec::new(),
        }
    }

    pub fn db(mut self, db: AsyncDatabase) -> Self {
        self.db = Some(db);
        self
    }

    pub fn transport(mut self, transport: FakeTransport) -> Self {
        self.transport = transport;
        self
    }

    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn handler(mut self, handler: Arc<dyn ResponseHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub async fn build(self) -> Harness {
        let db = match self.db {
            Some(db) => db,
            None => AsyncDatabase::open_in_memory().await.unwrap(),
        };
        let connectivity = Arc::new(if self.online {
            ManualConnectivitySource::reachable()
        } else {
            ManualConnectivitySource::unreachable()
        });
        let transport = Arc::new(self.transport);
        let listener = Arc::new(RecordingListener::default());

        let monitor = Arc::new(ConnectivityMonitor::new(connectivity.clone()));
        let router = Arc::new(CompletionRouter::spawn(self.handlers, Some(listener.clone())));
        let manager = RequestManager::new(
            RequestQueue::new(db.clone()),
            transport.clone(),
            monitor,
            router,
            self.policy,
        );
        manager.start().unwrap();

        Harness {
            db,
            manager,
            transport,
            connectivity,
            listener,
        }
    }
}

pub fn event(name: &str) -> RequestRecord {
    let url = Url::parse("https://push.example.com/api/mobileengage/v2/events/")
        .unwrap()
        .join(name)
        .unwrap();
    RequestRecord::post(url)
        .with_json_body(&serde_json::json!({ "name": name }))
        .unwrap()
}

/// Fail the test instead of hanging.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

/// Give the worker a moment to (not) do something.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
