//! Host bindings
//!
//! Everything the shell worker needs from the environment that embeds it:
//! cache storage, the network, and the set of open pages.

use std::sync::Arc;

use async_trait::async_trait;

use crate::service_worker::{CacheStorage, Clients, MemoryCacheStorage, Request, Response};

/// Transport-level fetch failure.
///
/// An HTTP error status is not a `NetworkError`; it arrives as an `Ok`
/// response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// Host unreachable, DNS failure, connection reset
    #[error("network unreachable: {0}")]
    Unreachable(String),
    /// Request aborted by the page or the environment
    #[error("request aborted")]
    Aborted,
    /// Environment gave up waiting
    #[error("request timed out")]
    Timeout,
}

/// Network access used for live navigation fetches.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform a single fetch attempt.
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// A network that is always unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        Err(NetworkError::Unreachable(request.url.clone()))
    }
}

/// Environment handles given to a worker at startup.
#[derive(Clone)]
pub struct WorkerHost {
    /// Named caches for the worker's origin
    pub caches: Arc<dyn CacheStorage>,
    /// Live network
    pub network: Arc<dyn Network>,
    /// Open pages
    pub clients: Arc<Clients>,
}

impl WorkerHost {
    /// Bundle host handles
    pub fn new(
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        clients: Arc<Clients>,
    ) -> Self {
        Self {
            caches,
            network,
            clients,
        }
    }

    /// In-memory caches, no clients, and the given network.
    pub fn in_memory(network: Arc<dyn Network>) -> Self {
        Self::new(
            Arc::new(MemoryCacheStorage::new()),
            network,
            Arc::new(Clients::new()),
        )
    }
}
