//! Test harness for running E2E scenarios
//!
//! Wires a worker to scripted hosts and keeps the hosts around so a test can
//! restart the worker on the same storage.

use std::sync::Arc;

use appshell_runtime::service_worker::{CacheStorage, MemoryCacheStorage};
use appshell_runtime::{
    ClientId, ClientType, Clients, Request, ShellWorker, WorkerConfig, WorkerHost,
};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::fixtures::{ScriptedNetwork, ORIGIN};

/// A worker plus the hosts it runs on.
pub struct TestHarness {
    /// In-memory caches backing the worker
    pub storage: Arc<MemoryCacheStorage>,
    /// Scripted network
    pub network: Arc<ScriptedNetwork>,
    /// Open pages
    pub clients: Arc<Clients>,
    /// The worker under test
    pub worker: Arc<ShellWorker>,
}

impl TestHarness {
    /// Fresh storage, online network, no pages
    pub fn new() -> Self {
        Self::with_storage(Arc::new(MemoryCacheStorage::new()))
    }

    /// Reuse an existing storage
    pub fn with_storage(storage: Arc<MemoryCacheStorage>) -> Self {
        let network = Arc::new(ScriptedNetwork::new());
        let clients = Arc::new(Clients::new());
        let worker = Self::spawn_worker(storage.clone(), network.clone(), clients.clone());
        Self {
            storage,
            network,
            clients,
            worker,
        }
    }

    /// Worker over an arbitrary cache storage
    pub fn worker_over(caches: Arc<dyn CacheStorage>, network: Arc<ScriptedNetwork>) -> ShellWorker {
        let host = WorkerHost::new(caches, network, Arc::new(Clients::new()));
        ShellWorker::new(WorkerConfig::for_origin(ORIGIN), host)
            .expect("fixture config is valid")
    }

    fn spawn_worker(
        storage: Arc<MemoryCacheStorage>,
        network: Arc<ScriptedNetwork>,
        clients: Arc<Clients>,
    ) -> Arc<ShellWorker> {
        let host = WorkerHost::new(storage, network, clients);
        Arc::new(
            ShellWorker::new(WorkerConfig::for_origin(ORIGIN), host)
                .expect("fixture config is valid"),
        )
    }

    /// Replace the worker with a new one on the same hosts, as after a
    /// browser restart.
    pub fn restart(&mut self) {
        self.worker = Self::spawn_worker(
            self.storage.clone(),
            self.network.clone(),
            self.clients.clone(),
        );
    }

    /// Open a window on `path`
    pub fn open_page(&self, path: &str) -> (ClientId, mpsc::UnboundedReceiver<Value>) {
        self.clients
            .connect(&url(path), ClientType::Window)
            .expect("fixture URL is valid")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Absolute URL on the fixture origin
pub fn url(path: &str) -> String {
    format!("{}{}", ORIGIN, path)
}

/// Top-level navigation on the fixture origin
pub fn navigate(path: &str) -> Request {
    Request::navigate(url(path))
}
