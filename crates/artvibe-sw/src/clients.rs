//! Clients: the open storefront pages the gateway can focus, open and claim.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::lifecycle::ServiceWorkerId;
use crate::ServiceWorkerError;

/// Client identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A client (an open page or worker).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: ClientId,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Worker controlling this client, if any.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    /// A top-level window showing `url`, not yet controlled.
    pub fn window(url: Url) -> Self {
        Self {
            id: ClientId::next(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// Options for `match_all`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Access to the pages of this origin.
#[async_trait]
pub trait WindowClients: Send + Sync {
    /// Clients matching `options`, in the order they were opened.
    async fn match_all(&self, options: ClientMatchOptions) -> Vec<Client>;

    /// Bring a window client to the front.
    async fn focus(&self, id: &ClientId) -> Result<Client, ServiceWorkerError>;

    /// Open a new window at `url`.
    async fn open_window(&self, url: &Url) -> Result<Client, ServiceWorkerError>;

    /// Make `controller` the controller of every client. Returns how many changed.
    async fn claim(&self, controller: ServiceWorkerId) -> Result<usize, ServiceWorkerError>;
}

/// In-memory clients registry.
#[derive(Debug, Default)]
pub struct Clients {
    clients: RwLock<Vec<Client>>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client.
    pub async fn add(&self, client: Client) {
        self.clients.write().await.push(client);
    }

    /// Remove a client.
    pub async fn remove(&self, id: &ClientId) -> Option<Client> {
        let mut clients = self.clients.write().await;
        let index = clients.iter().position(|c| &c.id == id)?;
        Some(clients.remove(index))
    }

    /// Get a client by ID.
    pub async fn get(&self, id: &ClientId) -> Option<Client> {
        self.clients.read().await.iter().find(|c| &c.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

#[async_trait]
impl WindowClients for Clients {
    async fn match_all(&self, options: ClientMatchOptions) -> Vec<Client> {
        self.clients
            .read()
            .await
            .iter()
            .filter(|c| options.include_uncontrolled || c.controller.is_some())
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .cloned()
            .collect()
    }

    async fn focus(&self, id: &ClientId) -> Result<Client, ServiceWorkerError> {
        let mut clients = self.clients.write().await;
        let target = clients
            .iter()
            .find(|c| &c.id == id)
            .ok_or_else(|| ServiceWorkerError::NotFound(id.as_str().to_string()))?;
        if target.client_type != ClientType::Window {
            return Err(ServiceWorkerError::ClientError(
                "Can only focus window clients".to_string(),
            ));
        }

        let mut focused = None;
        for client in clients.iter_mut() {
            client.focused = &client.id == id;
            if client.focused {
                focused = Some(client.clone());
            }
        }
        debug!(client = id.as_str(), "Focused client");
        focused.ok_or_else(|| ServiceWorkerError::NotFound(id.as_str().to_string()))
    }

    async fn open_window(&self, url: &Url) -> Result<Client, ServiceWorkerError> {
        let mut clients = self.clients.write().await;
        for client in clients.iter_mut() {
            client.focused = false;
        }

        let mut client = Client::window(url.clone());
        client.focused = true;
        clients.push(client.clone());
        debug!(client = client.id.as_str(), url = %url, "Opened window");
        Ok(client)
    }

    async fn claim(&self, controller: ServiceWorkerId) -> Result<usize, ServiceWorkerError> {
        let mut claimed = 0;
        for client in self.clients.write().await.iter_mut() {
            if client.controller != Some(controller) {
                client.controller = Some(controller);
                claimed += 1;
            }
        }
        Ok(claimed)
    }
}
