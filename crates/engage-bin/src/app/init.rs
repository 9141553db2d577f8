//! Wiring of storage, dispatcher and client.

use crate::listener::ConsoleStatusListener;
use engage_client::{ClientConfig, DeviceInfo, EngageClient};
use engage_config_and_utils::{Config, Paths};
use engage_database::AsyncDatabase;
use request_outbox::{
    basic_auth_header, CompletionRouter, ConnectivityMonitor, ConnectivityState, HttpTransport,
    ManualConnectivitySource, RequestManager, RequestQueue, RetryPolicy, StatusListener,
};
use response_handlers::{default_handlers, InAppPresenter, LoggingPresenter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Per-invocation options shared by the queuing commands.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub offline: bool,
    pub drain_timeout: Duration,
}

/// Fully wired engage stack for one CLI invocation.
pub struct Engage {
    pub db: AsyncDatabase,
    pub manager: Arc<RequestManager>,
    pub client: EngageClient,
    pub connectivity: Arc<ManualConnectivitySource>,
    pub listener: Arc<ConsoleStatusListener>,
}

impl Engage {
    /// Open the database and build every component. The dispatcher is not
    /// started.
    pub async fn open(mut config: Config, paths: &Paths) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;

        if config.hardware_id.as_deref().map_or(true, str::is_empty) {
            let hardware_id = uuid::Uuid::new_v4().to_string();
            info!(hardware_id = %hardware_id, "Assigned new hardware id");
            config.hardware_id = Some(hardware_id);
            config.save(paths)?;
        }

        info!(
            endpoint_base = %config.endpoint_base,
            application_code = %config.application_code,
            "Configuration loaded"
        );

        let db = AsyncDatabase::open(&paths.database_file())
            .await
            .map_err(|e| format!("Failed to open database: {}", e))?;
        info!(path = %paths.database_file().display(), "Database initialized");

        let mut transport = HttpTransport::new(Duration::from_secs(config.request_timeout_secs))?;
        match config.application_password.as_deref() {
            Some(password) => {
                transport = transport.with_default_header(
                    "Authorization",
                    basic_auth_header(&config.application_code, password),
                );
            }
            None => warn!("No application password configured; requests are sent unauthenticated"),
        }

        let presenter: Arc<dyn InAppPresenter> = Arc::new(LoggingPresenter);
        let handlers = default_handlers(&config.experimental_features, db.clone(), presenter);
        let listener = Arc::new(ConsoleStatusListener::default());
        let router = Arc::new(CompletionRouter::spawn(
            handlers,
            Some(listener.clone() as Arc<dyn StatusListener>),
        ));

        let connectivity = Arc::new(ManualConnectivitySource::new(ConnectivityState::Unreachable));
        let monitor = Arc::new(ConnectivityMonitor::new(connectivity.clone()));

        let manager = Arc::new(RequestManager::new(
            RequestQueue::new(db.clone()),
            Arc::new(transport),
            monitor,
            router,
            RetryPolicy::from(&config.retry),
        ));

        let device = DeviceInfo::detect(engage_client::SDK_VERSION);
        let client = EngageClient::new(
            ClientConfig::from_config(&config, device)?,
            Arc::clone(&manager),
            db.clone(),
        );

        Ok(Self {
            db,
            manager,
            client,
            connectivity,
            listener,
        })
    }

    /// Deliver queued requests until the queue is empty or the timeout
    /// passes, then stop. Returns the number of requests left queued.
    pub async fn deliver(&self, options: RunOptions) -> Result<usize, Box<dyn std::error::Error>> {
        if options.offline {
            let pending = self.manager.pending_count().await?;
            info!(pending, "Offline, leaving requests queued");
            self.manager.shutdown().await;
            return Ok(pending);
        }

        self.manager.start()?;
        self.connectivity.set_reachable(true);

        let deadline = tokio::time::Instant::now() + options.drain_timeout;
        let pending = loop {
            let pending = self.manager.pending_count().await?;
            if pending == 0 || tokio::time::Instant::now() >= deadline {
                break pending;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        };

        self.manager.shutdown().await;
        if pending > 0 {
            warn!(pending, "Requests still queued at exit");
        }
        Ok(pending)
    }
}
