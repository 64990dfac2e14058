//! # ArtVibe Service Worker
//!
//! Offline cache gateway for the ArtVibe storefront.
//!
//! ## Features
//!
//! - **Lifecycle**: install, activate, skip-waiting, unregister
//! - **Cache Storage**: versioned generations, all-or-nothing install, JSON snapshots
//! - **Fetch Interception**: cache first, network fallback, offline shell fallback
//! - **Push**: payload to system notification, click to focus-or-open
//!
//! ## Architecture
//!
//! ```text
//! GatewayHandle ──mpsc──> GatewayWorker (one task per event, JoinSet)
//!                              │
//!                              └── OfflineGateway
//!                                      ├── Registration (installing / waiting / active, shared)
//!                                      ├── CacheStorage
//!                                      │       └── Cache (generation)
//!                                      │               └── RequestKey → CacheEntry
//!                                      ├── Fetcher        (network port)
//!                                      ├── WindowClients  (open pages)
//!                                      └── Notifier       (system notifications)
//! ```

use artvibe_common::ArtVibeError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod gateway;
pub mod lifecycle;
pub mod notification;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{Cache, CacheEntry, CacheStorage, RequestKey, SharedCacheStorage};
pub use clients::{Client, ClientId, ClientMatchOptions, ClientType, Clients, WindowClients};
pub use config::{ConfigError, GatewayConfig, NotificationDefaults};
pub use gateway::{
    ActivationReport, ClickOutcome, GatewayResponse, InstallOutcome, OfflineGateway,
    ResponseSource, ServiceWorkerEvent,
};
pub use lifecycle::{
    Registration, ServiceWorker, ServiceWorkerId, ServiceWorkerState, SharedRegistration,
};
pub use notification::{
    Notification, NotificationCenter, NotificationData, NotificationId, NotificationOptions,
    Notifier, PushPayload,
};
pub use worker::{GatewayEvent, GatewayHandle, GatewayWorker};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Install of {cache} failed: {reason}")]
    InstallFailed { cache: String, reason: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Client error: {0}")]
    ClientError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Gateway worker has stopped")]
    WorkerStopped,
}

impl From<ConfigError> for ServiceWorkerError {
    fn from(err: ConfigError) -> Self {
        ServiceWorkerError::ConfigError(err.to_string())
    }
}

impl From<ConfigError> for ArtVibeError {
    fn from(err: ConfigError) -> Self {
        ArtVibeError::config_with_source("gateway config", err)
    }
}

impl From<ServiceWorkerError> for ArtVibeError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::InstallFailed { .. } | ServiceWorkerError::StateError(_) => {
                ArtVibeError::lifecycle_with_source("service worker lifecycle", err)
            }
            ServiceWorkerError::NetworkError(_) => {
                ArtVibeError::network_with_source("request failed", err)
            }
            ServiceWorkerError::CacheError(message) => ArtVibeError::cache(message),
            ServiceWorkerError::ConfigError(message) => ArtVibeError::config(message),
            ServiceWorkerError::ClientError(message)
            | ServiceWorkerError::NotificationError(message) => {
                ArtVibeError::notification(message)
            }
            ServiceWorkerError::NotFound(what) => ArtVibeError::NotFound(what),
            ServiceWorkerError::WorkerStopped => ArtVibeError::internal("gateway worker stopped"),
        }
    }
}
