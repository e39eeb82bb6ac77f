//! Service Worker Events
//!
//! Message payloads exchanged with pages, and the `Clients` registry that
//! tracks which pages are open and which of them this worker controls.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use spin::RwLock;
use tokio::sync::mpsc;
use url::{Origin, Url};

/// Client ID counter
static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of an open page or worker context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl core::fmt::Display for ClientId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Client type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    /// Window client
    #[default]
    Window,
    /// Worker client
    Worker,
    /// SharedWorker client
    SharedWorker,
    /// All types (match filter only)
    All,
}

/// Client errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// No such client
    #[error("client not found: {0}")]
    NotFound(ClientId),
    /// Client closed its message port
    #[error("client disconnected: {0}")]
    Disconnected(ClientId),
    /// Client URL is not absolute
    #[error("invalid client URL: {0}")]
    InvalidUrl(String),
}

/// Client info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client ID
    pub id: ClientId,
    /// Client type
    pub client_type: ClientType,
    /// Current URL
    pub url: Url,
    /// Whether this worker controls the client
    pub controlled: bool,
}

/// Options for matchAll
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchAllOptions {
    /// Include uncontrolled clients
    pub include_uncontrolled: bool,
    /// Client type filter
    pub client_type: ClientType,
}

struct ClientSlot {
    info: ClientInfo,
    mailbox: mpsc::UnboundedSender<Value>,
}

/// Clients API
pub struct Clients {
    clients: RwLock<BTreeMap<ClientId, ClientSlot>>,
    /// Origin of the active worker once it has claimed
    controller: RwLock<Option<Origin>>,
}

impl Clients {
    /// Create new clients API
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(BTreeMap::new()),
            controller: RwLock::new(None),
        }
    }

    /// Register an open page. Messages posted to it arrive on the receiver.
    ///
    /// Pages opened before `claim` start uncontrolled. Once a worker has
    /// claimed, every page opened on its origin is controlled from the start.
    pub fn connect(
        &self,
        url: &str,
        client_type: ClientType,
    ) -> Result<(ClientId, mpsc::UnboundedReceiver<Value>), ClientError> {
        let url = Url::parse(url).map_err(|_| ClientError::InvalidUrl(url.to_string()))?;
        let controlled = self.controller.read().as_ref() == Some(&url.origin());
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ClientId::new();
        let info = ClientInfo {
            id,
            client_type,
            url,
            controlled,
        };
        self.clients
            .write()
            .insert(id, ClientSlot { info, mailbox: tx });
        Ok((id, rx))
    }

    /// Remove a client (page closed)
    pub fn disconnect(&self, id: ClientId) -> bool {
        self.clients.write().remove(&id).is_some()
    }

    /// Get a client by ID
    pub fn get(&self, id: ClientId) -> Option<ClientInfo> {
        self.clients.read().get(&id).map(|slot| slot.info.clone())
    }

    /// Number of open clients, controlled or not
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether no client is open
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Match all clients
    pub fn match_all(&self, options: MatchAllOptions) -> Vec<ClientInfo> {
        self.clients
            .read()
            .values()
            .map(|slot| &slot.info)
            .filter(|info| {
                options.client_type == ClientType::All || info.client_type == options.client_type
            })
            .filter(|info| options.include_uncontrolled || info.controlled)
            .cloned()
            .collect()
    }

    /// Take control of every open client on `origin`, and of every client
    /// opened on it later. Returns how many open clients changed controller.
    pub fn claim(&self, origin: &Origin) -> usize {
        *self.controller.write() = Some(origin.clone());

        let mut claimed = 0;
        for slot in self.clients.write().values_mut() {
            if !slot.info.controlled && &slot.info.url.origin() == origin {
                slot.info.controlled = true;
                claimed += 1;
            }
        }
        claimed
    }

    /// Post a message to exactly one client
    pub fn post_message(&self, id: ClientId, payload: Value) -> Result<(), ClientError> {
        let clients = self.clients.read();
        let slot = clients.get(&id).ok_or(ClientError::NotFound(id))?;
        slot.mailbox
            .send(payload)
            .map_err(|_| ClientError::Disconnected(id))
    }
}

impl Default for Clients {
    fn default() -> Self {
        Self::new()
    }
}

/// Message event data
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Message payload, if any
    data: Option<Value>,
    /// Sending client
    source: Option<ClientId>,
}

impl MessageEvent {
    /// Create new message event
    pub fn new(data: Option<Value>) -> Self {
        Self { data, source: None }
    }

    /// Set source
    pub fn from_client(mut self, source: ClientId) -> Self {
        self.source = Some(source);
        self
    }

    /// Get data
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Get source
    pub fn source(&self) -> Option<ClientId> {
        self.source
    }
}

/// Control messages understood by the worker, tagged on `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Leave the waiting state and activate now
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
    /// Report how many pages this worker controls
    #[serde(rename = "CLIENTS_INFO")]
    ClientsInfo,
    /// Any other `type`; kept so newer pages don't break older workers
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Decode a payload. `None` for payloads without a `type` tag.
    pub fn parse(data: &Value) -> Option<Self> {
        ControlMessage::deserialize(data).ok()
    }
}

/// Reply to `CLIENTS_INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "CLIENTS_INFO", rename_all = "camelCase")]
pub struct ClientsInfoReply {
    /// Controlled window clients
    pub clients_count: usize,
}
