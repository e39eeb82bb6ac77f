//! Service Worker Module
//!
//! The shell worker: a background agent that keeps the latest application
//! shell cached, serves it when the network is gone, cleans up after the
//! previous precaching worker, and answers control messages from pages.
//!
//! Events arrive as [`WorkerEvent`]s, either handed to [`ShellWorker::handle`]
//! directly or fed through the event loop started by [`ShellWorker::start`].

mod cache;
mod events;
mod fetch;
mod lifecycle;

pub use cache::*;
pub use events::*;
pub use fetch::*;
pub use lifecycle::*;

use std::sync::Arc;

use spin::Mutex;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use url::Origin;

use crate::config::{ConfigError, WorkerConfig};
use crate::host::WorkerHost;

/// Service Worker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceWorkerState {
    /// Initial state, script evaluated
    #[default]
    Parsed,
    /// Installing (install event fired)
    Installing,
    /// Installed, waiting to activate
    Installed,
    /// Activating (activate event fired)
    Activating,
    /// Active and controlling pages
    Activated,
    /// Activation failed or replaced
    Redundant,
}

/// Service Worker error types
#[derive(Debug, thiserror::Error)]
pub enum ServiceWorkerError {
    /// State transition invalid
    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidStateTransition {
        from: ServiceWorkerState,
        to: ServiceWorkerState,
    },
    /// A legacy cache could not be deleted during activation
    #[error("failed to delete legacy cache '{cache}': {source}")]
    CacheCleanup { cache: String, source: CacheError },
    /// Cache storage failure
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// Bad configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Events delivered to the worker by its host.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Install event
    Install,
    /// Activate event
    Activate,
    /// Message from a page
    Message(MessageEvent),
    /// Request from a page
    Fetch(FetchEvent),
}

/// The shell caching worker.
pub struct ShellWorker {
    /// Configuration
    config: WorkerConfig,
    /// Origin the worker controls
    origin: Origin,
    /// Lifecycle state
    lifecycle: Mutex<LifecycleManager>,
    /// Navigation handling
    interceptor: NavigationInterceptor,
    caches: Arc<dyn CacheStorage>,
    clients: Arc<Clients>,
}

impl ShellWorker {
    /// Create a worker in the `Parsed` state.
    pub fn new(config: WorkerConfig, host: WorkerHost) -> Result<Self, ServiceWorkerError> {
        config.validate()?;
        let origin = config.parsed_origin()?;
        let interceptor = NavigationInterceptor::new(
            origin.clone(),
            config.route()?,
            &config.shell_cache_name,
            &config.shell_key,
            host.caches.clone(),
            host.network,
        );

        Ok(Self {
            config,
            origin,
            lifecycle: Mutex::new(LifecycleManager::new()),
            interceptor,
            caches: host.caches,
            clients: host.clients,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Get current state
    pub fn state(&self) -> ServiceWorkerState {
        self.lifecycle.lock().state()
    }

    /// Check if the worker is active
    pub fn is_active(&self) -> bool {
        self.state() == ServiceWorkerState::Activated
    }

    /// Lifecycle events recorded so far
    pub fn lifecycle_events(&self) -> Vec<LifecycleEvent> {
        self.lifecycle.lock().pending_events().to_vec()
    }

    /// The clients registry
    pub fn clients(&self) -> &Arc<Clients> {
        &self.clients
    }

    /// Handle one event.
    ///
    /// Only lifecycle events can fail; message and fetch handling never
    /// returns an error.
    pub async fn handle(&self, event: WorkerEvent) -> Result<(), ServiceWorkerError> {
        match event {
            WorkerEvent::Install => self.install().await,
            WorkerEvent::Activate => self.activate().await,
            WorkerEvent::Message(message) => {
                self.on_message(&message).await;
                Ok(())
            }
            WorkerEvent::Fetch(mut fetch) => {
                let result = self.on_fetch(fetch.request()).await;
                fetch.respond_with(result);
                Ok(())
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────

    /// Install handler: request activation without waiting for older
    /// workers to release their pages. Idempotent.
    pub fn on_install(&self) {
        self.lifecycle.lock().skip_waiting();
        log::info!("[ShellWorker] Install: skip waiting requested");
    }

    /// Activate handler: delete legacy caches, then take control of open
    /// pages. Pages are only claimed after every deletion succeeded.
    pub async fn on_activate(&self) -> Result<(), ServiceWorkerError> {
        let purged =
            purge_legacy_caches(self.caches.as_ref(), &self.config.legacy_cache_prefix).await?;
        if !purged.is_empty() {
            log::info!("[ShellWorker] Removed legacy caches: {:?}", purged);
        }

        let mut lifecycle = self.lifecycle.lock();
        lifecycle.dispatch(LifecycleEvent::LegacyCachesPurged(purged));
        lifecycle.ensure_can_claim()?;
        let claimed = self.clients.claim(&self.origin);
        lifecycle.dispatch(LifecycleEvent::ControllerChange { claimed });
        log::info!("[ShellWorker] Claimed {} client(s)", claimed);
        Ok(())
    }

    /// Drive an install event through the state machine.
    ///
    /// The first install moves `Parsed -> Installing -> Installed` and, since
    /// skip waiting is always requested, continues into activation. Later
    /// install events only re-run the handler.
    async fn install(&self) -> Result<(), ServiceWorkerError> {
        let first = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state() == ServiceWorkerState::Parsed {
                lifecycle.transition_state(ServiceWorkerState::Installing)?;
                true
            } else {
                false
            }
        };

        self.on_install();
        if !first {
            return Ok(());
        }

        let skip_waiting = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.transition_state(ServiceWorkerState::Installed)?;
            lifecycle.skip_waiting_requested()
        };
        if skip_waiting {
            self.activate().await?;
        }
        Ok(())
    }

    /// Drive activation. Ignored unless the worker is waiting.
    async fn activate(&self) -> Result<(), ServiceWorkerError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state() != ServiceWorkerState::Installed {
                log::debug!(
                    "[ShellWorker] Activate ignored in state {:?}",
                    lifecycle.state()
                );
                return Ok(());
            }
            lifecycle.transition_state(ServiceWorkerState::Activating)?;
        }

        match self.on_activate().await {
            Ok(()) => {
                self.lifecycle
                    .lock()
                    .transition_state(ServiceWorkerState::Activated)?;
                Ok(())
            }
            Err(e) => {
                log::error!("[ShellWorker] Activation failed: {}", e);
                self.lifecycle
                    .lock()
                    .transition_state(ServiceWorkerState::Redundant)?;
                Err(e)
            }
        }
    }

    // ── Messages ────────────────────────────────────────────

    /// Message handler. Unknown or malformed messages are ignored.
    pub async fn on_message(&self, event: &MessageEvent) {
        let Some(data) = event.data() else {
            return;
        };

        match ControlMessage::parse(data) {
            Some(ControlMessage::SkipWaiting) => {
                let waiting = self.lifecycle.lock().skip_waiting();
                if waiting {
                    if let Err(e) = self.activate().await {
                        log::error!("[ShellWorker] SKIP_WAITING activation failed: {}", e);
                    }
                }
            }
            Some(ControlMessage::ClientsInfo) => self.reply_clients_info(event.source()),
            Some(ControlMessage::Unknown) | None => {
                log::debug!("[ShellWorker] Ignoring message {}", data);
            }
        }
    }

    /// Send the controlled-page count back to the asking page only.
    fn reply_clients_info(&self, source: Option<ClientId>) {
        let Some(source) = source else {
            log::debug!("[ShellWorker] CLIENTS_INFO without a source, not replying");
            return;
        };

        let clients_count = self.clients.match_all(MatchAllOptions::default()).len();
        let reply = match serde_json::to_value(ClientsInfoReply { clients_count }) {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("[ShellWorker] Cannot encode CLIENTS_INFO reply: {}", e);
                return;
            }
        };
        if let Err(e) = self.clients.post_message(source, reply) {
            log::warn!("[ShellWorker] CLIENTS_INFO reply not delivered: {}", e);
        }
    }

    // ── Fetch ───────────────────────────────────────────────

    /// Fetch handler
    pub async fn on_fetch(&self, request: &Request) -> FetchResult {
        self.interceptor.intercept(request).await
    }

    /// The shell currently cached, if any
    pub async fn cached_shell(&self) -> Option<Response> {
        self.interceptor.cached_shell().await
    }

    /// Wait for background shell cache writes to finish
    pub async fn settle(&self) {
        self.interceptor.settle().await;
    }

    // ── Event loop ──────────────────────────────────────────

    /// Run the event loop until every sender is dropped.
    ///
    /// Lifecycle events are handled in order, one at a time. Messages and
    /// fetches run as concurrent tasks.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
        let mut tasks = JoinSet::new();

        while let Some(event) = events.recv().await {
            while tasks.try_join_next().is_some() {}

            match event {
                WorkerEvent::Install | WorkerEvent::Activate => {
                    if let Err(e) = self.handle(event).await {
                        log::error!("[ShellWorker] Lifecycle event failed: {}", e);
                    }
                }
                event => {
                    let worker = self.clone();
                    tasks.spawn(async move {
                        // Message and fetch handling does not fail.
                        let _ = worker.handle(event).await;
                    });
                }
            }
        }

        while tasks.join_next().await.is_some() {}
        self.settle().await;
        log::info!("[ShellWorker] Event loop stopped");
    }

    /// Spawn the event loop and return a handle to feed it.
    pub fn start(self: Arc<Self>) -> WorkerHandle {
        let (sender, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.clone().run(events));
        WorkerHandle {
            worker: self,
            sender,
            task,
        }
    }
}

/// Handle to a running worker's event loop.
pub struct WorkerHandle {
    worker: Arc<ShellWorker>,
    sender: mpsc::UnboundedSender<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// The worker behind the loop
    pub fn worker(&self) -> &Arc<ShellWorker> {
        &self.worker
    }

    /// Queue an event. `false` if the loop has stopped.
    pub fn dispatch(&self, event: WorkerEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// Queue a message from a page
    pub fn post_message(&self, message: MessageEvent) -> bool {
        self.dispatch(WorkerEvent::Message(message))
    }

    /// Send a request through the worker and wait for its result.
    ///
    /// A fetch the worker never answered behaves like one it did not
    /// intercept.
    pub async fn fetch(&self, request: Request) -> FetchResult {
        let (event, result) = FetchEvent::new(request);
        if !self.dispatch(WorkerEvent::Fetch(event)) {
            return FetchResult::Passthrough;
        }
        result.await.unwrap_or(FetchResult::Passthrough)
    }

    /// Close the event queue and wait for in-flight work to drain.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.task.await {
            log::error!("[ShellWorker] Event loop task ended abnormally: {}", e);
        }
    }
}
