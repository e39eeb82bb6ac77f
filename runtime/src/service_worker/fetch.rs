//! Fetch Event Handling
//!
//! Implements fetch event interception for the shell worker. Only top-level
//! navigations to an application root (`/apps/{name}` or `/apps/{name}/`) on
//! the worker's own origin are intercepted; they are served network-first and
//! written through to the shell cache. Everything else passes through.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use url::{Origin, Url};

use super::cache::CacheStorage;
use crate::host::Network;

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMethod {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
}

/// Request mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Same-origin only
    SameOrigin,
    /// No CORS
    #[default]
    NoCors,
    /// CORS
    Cors,
    /// Top-level navigation
    Navigate,
}

/// Fetch request
#[derive(Debug, Clone)]
pub struct Request {
    /// Absolute request URL
    pub url: String,
    /// HTTP method
    pub method: RequestMethod,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// Request mode
    pub mode: RequestMode,
}

impl Request {
    /// Create a new sub-resource request
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: RequestMethod::Get,
            headers: BTreeMap::new(),
            mode: RequestMode::Cors,
        }
    }

    /// Create a top-level document navigation
    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::new(url)
        }
    }

    /// Set the method (a form submission navigates with `POST`)
    pub fn with_method(mut self, method: RequestMethod) -> Self {
        self.method = method;
        self
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Whether this is a top-level page navigation
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// Fetch response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Final URL
    pub url: String,
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: BTreeMap<String, String>,
    /// Response body
    pub body: Vec<u8>,
}

impl Response {
    /// Create a new response with an empty body
    pub fn new(status: u16) -> Self {
        Self {
            url: String::new(),
            status,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// Create an HTML document response
    pub fn html(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_body(body)
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Set the final URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Indicates where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// Live network answer (any status).
    Network,
    /// Shell cache fallback after a transport failure.
    Cache,
}

/// Result of handling a fetch event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// Not intercepted; the browser performs the request itself.
    Passthrough,
    /// Intercepted and answered.
    Response(Response, FetchSource),
    /// Intercepted, but the network was unreachable and the cache was empty.
    /// The browser shows its own offline error.
    Unavailable,
}

impl FetchResult {
    /// Whether the worker claimed the event.
    pub fn intercepted(&self) -> bool {
        !matches!(self, FetchResult::Passthrough)
    }

    /// The response, if one was produced.
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchResult::Response(response, _) => Some(response),
            _ => None,
        }
    }
}

/// Fetch event
#[derive(Debug)]
pub struct FetchEvent {
    /// Request
    request: Request,
    /// Where the result goes (`respondWith`)
    responder: Option<oneshot::Sender<FetchResult>>,
}

impl FetchEvent {
    /// Create a fetch event and the receiver its result is delivered to
    pub fn new(request: Request) -> (Self, oneshot::Receiver<FetchResult>) {
        let (tx, rx) = oneshot::channel();
        let event = Self {
            request,
            responder: Some(tx),
        };
        (event, rx)
    }

    /// Get the request
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Check if a result was already delivered
    pub fn responded(&self) -> bool {
        self.responder.is_none()
    }

    /// Deliver the result. Only the first call has an effect.
    pub fn respond_with(&mut self, result: FetchResult) {
        if let Some(tx) = self.responder.take() {
            // The page may have gone away; nothing to do then.
            let _ = tx.send(result);
        }
    }
}

/// Request classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Same-origin navigation to an application root
    ShellNavigation,
    /// Anything else
    Other,
}

/// Matcher for application root paths: `{prefix}{segment}` or
/// `{prefix}{segment}/`, where the segment has no `/` and no `.`.
#[derive(Debug, Clone)]
pub struct NavigationRoute {
    pattern: Regex,
}

impl NavigationRoute {
    /// Build the route for a path prefix such as `/apps/`.
    pub fn new(prefix: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!("^{}[^/.]+/?$", regex::escape(prefix)))?;
        Ok(Self { pattern })
    }

    /// Check a URL path
    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }
}

/// The navigation interceptor.
///
/// Serves application shell navigations network-first and keeps the most
/// recent answer in the shell cache.
pub struct NavigationInterceptor {
    /// Origin the worker is registered for
    origin: Origin,
    /// Application root matcher
    route: NavigationRoute,
    /// Name of the shell cache
    cache_name: String,
    /// Key of the single shell entry
    shell_key: String,
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    /// Cache writes still in flight
    background: spin::Mutex<JoinSet<()>>,
}

impl NavigationInterceptor {
    /// Create new interceptor
    pub fn new(
        origin: Origin,
        route: NavigationRoute,
        cache_name: &str,
        shell_key: &str,
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            origin,
            route,
            cache_name: String::from(cache_name),
            shell_key: String::from(shell_key),
            caches,
            network,
            background: spin::Mutex::new(JoinSet::new()),
        }
    }

    /// Classify a request. Only `GET` navigations can be shell navigations.
    pub fn classify(&self, request: &Request) -> RequestClass {
        let url = match Url::parse(&request.url) {
            Ok(url) => url,
            Err(e) => {
                log::debug!("[ShellWorker Fetch] Unparseable URL {}: {}", request.url, e);
                return RequestClass::Other;
            }
        };

        if url.origin() != self.origin {
            return RequestClass::Other;
        }
        if !request.is_navigation() || request.method != RequestMethod::Get {
            return RequestClass::Other;
        }
        if !self.route.matches(url.path()) {
            return RequestClass::Other;
        }
        RequestClass::ShellNavigation
    }

    /// Handle one request.
    ///
    /// Transport failures fall back to the cached shell; HTTP error statuses
    /// are returned and cached like any other answer. A single fetch attempt
    /// is made.
    pub async fn intercept(&self, request: &Request) -> FetchResult {
        if self.classify(request) != RequestClass::ShellNavigation {
            return FetchResult::Passthrough;
        }
        log::debug!("[ShellWorker Fetch] Intercepting navigation to {}", request.url);

        match self.network.fetch(request).await {
            Ok(response) => {
                self.store_in_background(response.clone());
                FetchResult::Response(response, FetchSource::Network)
            }
            Err(e) => {
                log::warn!(
                    "[ShellWorker Fetch] Network failed for {} ({}), serving cached shell",
                    request.url,
                    e
                );
                match self.cached_shell().await {
                    Some(response) => FetchResult::Response(response, FetchSource::Cache),
                    None => FetchResult::Unavailable,
                }
            }
        }
    }

    /// Read the cached shell, if any.
    pub async fn cached_shell(&self) -> Option<Response> {
        let cache = match self.caches.open(&self.cache_name).await {
            Ok(cache) => cache,
            Err(e) => {
                log::warn!("[ShellWorker Fetch] Cannot open '{}': {}", self.cache_name, e);
                return None;
            }
        };
        match cache.match_key(&self.shell_key).await {
            Ok(found) => found,
            Err(e) => {
                log::warn!("[ShellWorker Fetch] Cache read failed: {}", e);
                None
            }
        }
    }

    /// Spawn the shell cache write without waiting for it.
    fn store_in_background(&self, response: Response) {
        let caches = self.caches.clone();
        let cache_name = self.cache_name.clone();
        let key = self.shell_key.clone();

        let mut background = self.background.lock();
        // Reap finished writes so the set only holds in-flight ones.
        while background.try_join_next().is_some() {}
        background.spawn(async move {
            let stored = match caches.open(&cache_name).await {
                Ok(cache) => cache.put(&key, response).await,
                Err(e) => Err(e),
            };
            if let Err(e) = stored {
                log::warn!("[ShellWorker Fetch] Shell cache write dropped: {}", e);
            }
        });
    }

    /// Wait for every background cache write spawned so far.
    pub async fn settle(&self) {
        loop {
            let mut pending = std::mem::take(&mut *self.background.lock());
            if pending.is_empty() {
                return;
            }
            while pending.join_next().await.is_some() {}
        }
    }
}
