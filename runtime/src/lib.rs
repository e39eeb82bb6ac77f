//! AppShell Service Worker Runtime
//!
//! This crate provides the background worker that sits in front of a
//! multi-app web platform and keeps the application shell available offline.
//! Navigations to an application root (`/apps/{name}` or `/apps/{name}/`)
//! are answered network-first; the latest answer is written through to a
//! single cache entry and served when the network is unreachable. Every
//! other request is left to the browser.
//!
//! # Architecture
//!
//! - `service_worker`: the worker itself (lifecycle, messages, fetch, caches)
//! - `host`: environment bindings (network, cache storage, clients)
//! - `config`: cache names, key, legacy prefix and route prefix
//!
//! ```text
//!   host ──WorkerEvent──▶ ShellWorker::run
//!                           ├─ Install / Activate  (in order)
//!                           ├─ Message             (task)
//!                           └─ Fetch               (task) ──▶ Network
//!                                                       └──▶ CacheStorage
//! ```

pub mod config;
pub mod host;
pub mod service_worker;

pub use config::{ConfigError, WorkerConfig};
pub use host::{Network, NetworkError, OfflineNetwork, WorkerHost};
pub use service_worker::{
    ClientId, ClientType, Clients, FetchResult, FetchSource, MessageEvent, Request, Response,
    ServiceWorkerError, ServiceWorkerState, ShellWorker, WorkerEvent, WorkerHandle,
};

use std::sync::Arc;

/// Build a worker from a JSON config and start its event loop.
///
/// Must be called from within a Tokio runtime.
pub fn launch(config_json: &str, host: WorkerHost) -> Result<WorkerHandle, ServiceWorkerError> {
    let config = WorkerConfig::from_json(config_json)?;
    let worker = Arc::new(ShellWorker::new(config, host)?);
    log::info!(
        "[ShellWorker] Starting for {} (shell cache '{}')",
        worker.config().origin,
        worker.config().shell_cache_name
    );
    Ok(worker.start())
}
