//! The offline cache gateway: install, activate, fetch, push, notification click.

use std::sync::Arc;

use artvibe_net::{Fetcher, Request, Response};
use futures::future::try_join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{Cache, CacheEntry, CacheStorage, RequestKey, SharedCacheStorage};
use crate::clients::{Client, ClientMatchOptions, ClientType, Clients, WindowClients};
use crate::config::GatewayConfig;
use crate::lifecycle::{
    Registration, ServiceWorker, ServiceWorkerId, ServiceWorkerState, SharedRegistration,
};
use crate::notification::{Notification, NotificationCenter, NotificationId, Notifier, PushPayload};
use crate::ServiceWorkerError;

/// Lifecycle and housekeeping events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// Worker state changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A stale cache generation was deleted.
    CacheDeleted { name: String },
    /// Open pages were claimed by the activated worker.
    ClientsClaimed {
        worker_id: ServiceWorkerId,
        count: usize,
    },
    /// A push produced a notification.
    NotificationShown { id: NotificationId },
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Current cache generation.
    Cache,
    /// Network.
    Network,
    /// Cached application shell, served because the network failed.
    Fallback,
}

/// Response handed back to the page.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub response: Response,
    pub source: ResponseSource,
}

/// Result of an activation.
#[derive(Debug, Clone)]
pub struct ActivationReport {
    pub worker: ServiceWorkerId,
    pub deleted_caches: Vec<String>,
    pub claimed_clients: usize,
}

/// Result of an install event.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub worker: ServiceWorkerId,
    /// Present when skip-waiting activated the worker right away.
    pub activation: Option<ActivationReport>,
}

/// What a notification click did.
#[derive(Debug, Clone)]
pub enum ClickOutcome {
    /// An open page already showed the target and was focused.
    Focused(Client),
    /// A new window was opened at the target.
    Opened(Client),
}

impl ClickOutcome {
    pub fn client(&self) -> &Client {
        match self {
            ClickOutcome::Focused(client) | ClickOutcome::Opened(client) => client,
        }
    }
}

/// Offline cache gateway for one origin.
pub struct OfflineGateway {
    config: GatewayConfig,
    cache_name: String,
    origin: Url,
    manifest: Vec<Url>,
    shell_url: Url,

    caches: SharedCacheStorage,
    network: Arc<dyn Fetcher>,
    clients: Arc<dyn WindowClients>,
    notifier: Arc<dyn Notifier>,

    registration: SharedRegistration,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl OfflineGateway {
    /// Create a gateway with empty cache storage, in-memory clients and an
    /// in-memory notification center.
    pub fn new(
        config: GatewayConfig,
        network: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>), ServiceWorkerError> {
        config.validate()?;
        let origin = config.origin_url()?;
        let manifest = config.manifest_urls()?;
        let shell_url = config.shell_url()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let gateway = Self {
            cache_name: config.cache_name(),
            registration: Registration::new(origin.clone()).shared(),
            origin,
            manifest,
            shell_url,
            caches: CacheStorage::new().shared(),
            network,
            clients: Arc::new(Clients::new()),
            notifier: Arc::new(NotificationCenter::new()),
            config,
            event_tx,
        };
        Ok((gateway, event_rx))
    }

    /// Use existing cache storage, e.g. one loaded from a snapshot.
    pub fn with_cache_storage(mut self, caches: SharedCacheStorage) -> Self {
        self.caches = caches;
        self
    }

    /// Join an existing registration, so an older active version keeps
    /// serving until this one activates.
    pub fn with_registration(mut self, registration: SharedRegistration) -> Self {
        self.registration = registration;
        self
    }

    pub fn with_clients(mut self, clients: Arc<dyn WindowClients>) -> Self {
        self.clients = clients;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Name of the cache generation this version installs.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn cache_storage(&self) -> SharedCacheStorage {
        Arc::clone(&self.caches)
    }

    pub fn registration(&self) -> SharedRegistration {
        Arc::clone(&self.registration)
    }

    /// The active worker, if any.
    pub async fn active_worker(&self) -> Option<ServiceWorker> {
        self.registration.read().await.active.clone()
    }

    /// The installed worker waiting for activation, if any.
    pub async fn waiting_worker(&self) -> Option<ServiceWorker> {
        self.registration.read().await.waiting.clone()
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, worker_id: ServiceWorkerId, new_state: ServiceWorkerState) {
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id,
            new_state,
        });
    }

    // ==================== Install ====================

    /// Install event, followed by activation when `skip_waiting` is set.
    pub async fn on_install(&self) -> Result<InstallOutcome, ServiceWorkerError> {
        let worker = self.install().await?;
        let activation = if self.config.skip_waiting {
            Some(self.activate().await?)
        } else {
            None
        };
        Ok(InstallOutcome { worker, activation })
    }

    /// Fetch every manifest resource and publish them as the current
    /// generation. Nothing is published unless every fetch succeeds.
    pub async fn install(&self) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let worker_id = self
            .registration
            .write()
            .await
            .begin_install(&self.cache_name);
        self.emit_state(worker_id, ServiceWorkerState::Installing);
        info!(cache = %self.cache_name, resources = self.manifest.len(), "Installing");

        match self.populate().await {
            Ok(generation) => {
                {
                    let mut registration = self.registration.write().await;
                    if let Err(e) = registration.install_complete(worker_id) {
                        warn!(cache = %self.cache_name, error = %e, "Install superseded, discarding");
                        return Err(e);
                    }
                    self.caches.write().await.publish(generation);
                }
                self.emit_state(worker_id, ServiceWorkerState::Installed);
                info!(cache = %self.cache_name, "Installed");
                Ok(worker_id)
            }
            Err(e) => {
                let reason = e.to_string();
                error!(cache = %self.cache_name, error = %reason, "Caching failed");
                if let Err(state) = self
                    .registration
                    .write()
                    .await
                    .install_failed(worker_id, reason.clone())
                {
                    debug!(error = %state, "Failed worker already superseded");
                }
                self.emit_state(worker_id, ServiceWorkerState::Redundant);
                Err(ServiceWorkerError::InstallFailed {
                    cache: self.cache_name.clone(),
                    reason,
                })
            }
        }
    }

    async fn populate(&self) -> Result<Cache, ServiceWorkerError> {
        let fetches = self.manifest.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let response = self
                .network
                .fetch(&request)
                .await
                .map_err(|e| ServiceWorkerError::NetworkError(format!("{url}: {e}")))?;
            if !response.is_success() {
                return Err(ServiceWorkerError::NetworkError(format!(
                    "{url}: HTTP {}",
                    response.status
                )));
            }
            Ok::<_, ServiceWorkerError>((request, response))
        });
        let fetched = try_join_all(fetches).await?;

        let mut generation = Cache::new(&self.cache_name);
        for (request, response) in &fetched {
            generation.put(request, response)?;
        }
        Ok(generation)
    }

    // ==================== Activate ====================

    /// Delete every non-current generation, promote the waiting worker and
    /// claim all open pages.
    pub async fn activate(&self) -> Result<ActivationReport, ServiceWorkerError> {
        let (worker_id, current) = {
            let mut registration = self.registration.write().await;
            let worker = registration.begin_activation()?;
            (worker.id, worker.cache_name.clone())
        };
        self.emit_state(worker_id, ServiceWorkerState::Activating);
        info!(cache = %current, "Activating");

        let deleted_caches = {
            let mut caches = self.caches.write().await;
            let stale: Vec<String> = caches
                .keys()
                .into_iter()
                .filter(|name| name != &current)
                .collect();
            for name in &stale {
                info!(cache = %name, "Deleting old cache");
                caches.delete(name);
            }
            stale
        };
        for name in &deleted_caches {
            self.emit(ServiceWorkerEvent::CacheDeleted { name: name.clone() });
        }

        let superseded = self.registration.write().await.finish_activation()?;
        if let Some(old) = superseded {
            self.emit_state(old.id, ServiceWorkerState::Redundant);
        }
        self.emit_state(worker_id, ServiceWorkerState::Activated);
        info!(cache = %current, "Activated");

        let claimed_clients = self.clients.claim(worker_id).await?;
        self.emit(ServiceWorkerEvent::ClientsClaimed {
            worker_id,
            count: claimed_clients,
        });

        Ok(ActivationReport {
            worker: worker_id,
            deleted_caches,
            claimed_clients,
        })
    }

    /// Mark every worker redundant. Cache generations are left in place.
    pub async fn unregister(&self) -> Vec<ServiceWorkerId> {
        let dropped = self.registration.write().await.unregister();
        for id in &dropped {
            self.emit_state(*id, ServiceWorkerState::Redundant);
        }
        info!(workers = dropped.len(), "Unregistered");
        dropped
    }

    // ==================== Fetch ====================

    /// Generation that fetches read from and write back to: the active
    /// worker's, or this version's own when nothing is active yet and it
    /// exists (e.g. restored from a snapshot).
    async fn serving_cache(&self) -> Option<String> {
        if let Some(active) = self.registration.read().await.get_active() {
            return Some(active.cache_name.clone());
        }
        self.caches
            .read()
            .await
            .has(&self.cache_name)
            .then(|| self.cache_name.clone())
    }

    async fn lookup(&self, cache: Option<&str>, key: &RequestKey) -> Option<CacheEntry> {
        let cache = cache?;
        self.caches.read().await.match_in(cache, key).cloned()
    }

    /// Cache first, then network, then the cached application shell.
    pub async fn handle_fetch(&self, request: &Request) -> Result<GatewayResponse, ServiceWorkerError> {
        let key = RequestKey::for_request(request);
        let serving = self.serving_cache().await;

        if let Some(entry) = self.lookup(serving.as_deref(), &key).await {
            match entry.to_response() {
                Ok(response) => {
                    debug!(%key, "Cache hit");
                    return Ok(GatewayResponse {
                        response,
                        source: ResponseSource::Cache,
                    });
                }
                Err(e) => warn!(%key, error = %e, "Unreadable cache entry"),
            }
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                debug!(%key, status = %response.status, "Network response");
                if let Some(cache) = serving.as_deref().filter(|_| request.is_retrieval()) {
                    let mut caches = self.caches.write().await;
                    // Activation may have deleted it meanwhile; never recreate.
                    if caches.has(cache) {
                        if let Err(e) = caches.open(cache).put(request, &response) {
                            warn!(%key, error = %e, "Cache write-back failed");
                        }
                    }
                }
                Ok(GatewayResponse {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Fetch failed");
                let shell = self
                    .lookup(serving.as_deref(), &RequestKey::get(&self.shell_url))
                    .await;
                match shell {
                    Some(entry) => Ok(GatewayResponse {
                        response: entry.to_response()?,
                        source: ResponseSource::Fallback,
                    }),
                    None => Err(ServiceWorkerError::NetworkError(format!(
                        "{}: {e}",
                        request.url
                    ))),
                }
            }
        }
    }

    // ==================== Push ====================

    /// Show a notification for a push message.
    pub async fn handle_push(&self, data: Option<&[u8]>) -> Result<Notification, ServiceWorkerError> {
        debug!(bytes = ?data.map(<[u8]>::len), "Push event received");
        let payload = PushPayload::parse(data);
        let (title, options) = payload.to_notification(&self.config.notifications);

        let notification = self.notifier.show_notification(&title, options).await?;
        info!(id = notification.id.raw(), title = %notification.title, "Notification scheduled");
        self.emit(ServiceWorkerEvent::NotificationShown {
            id: notification.id,
        });
        Ok(notification)
    }

    /// Close the notification, then focus a page already at its URL or open one.
    pub async fn handle_notification_click(
        &self,
        notification: &Notification,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        self.notifier.close(notification.id).await;

        let target = match notification.options.data.url.as_str() {
            "" => self.config.notifications.url.as_str(),
            url => url,
        };
        let target = self
            .origin
            .join(target)
            .map_err(|e| ServiceWorkerError::ClientError(format!("{target}: {e}")))?;

        let open = self
            .clients
            .match_all(ClientMatchOptions {
                include_uncontrolled: true,
                client_type: ClientType::Window,
            })
            .await;
        if let Some(client) = open.iter().find(|c| c.url == target) {
            debug!(client = client.id.as_str(), url = %target, "Focusing open page");
            let focused = self.clients.focus(&client.id).await?;
            return Ok(ClickOutcome::Focused(focused));
        }

        debug!(url = %target, "Opening window");
        let opened = self.clients.open_window(&target).await?;
        Ok(ClickOutcome::Opened(opened))
    }
}
