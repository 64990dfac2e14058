//! Service worker lifecycle: one registration, up to three worker slots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::ServiceWorkerError;

/// A registration shared by every gateway version of one origin.
pub type SharedRegistration = Arc<RwLock<Registration>>;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Installing (populating its cache generation).
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Activating (deleting stale generations).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (superseded or install failed).
    Redundant,
}

/// A service worker instance, bound to one cache generation.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Cache generation this worker installs and serves.
    pub cache_name: String,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Error message if install failed.
    pub error: Option<String>,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(cache_name: &str) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            cache_name: cache_name.to_string(),
            state: ServiceWorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

/// The service worker registration for the storefront origin.
#[derive(Debug)]
pub struct Registration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed, or activating).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

impl Registration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Wrap for sharing between gateway versions.
    pub fn shared(self) -> SharedRegistration {
        Arc::new(RwLock::new(self))
    }

    /// Get the active worker.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Start installing a new worker for `cache_name`.
    ///
    /// A worker already installing is replaced and becomes redundant.
    pub fn begin_install(&mut self, cache_name: &str) -> ServiceWorkerId {
        let mut worker = ServiceWorker::new(cache_name);
        worker.set_state(ServiceWorkerState::Installing);
        let id = worker.id;
        if let Some(mut previous) = self.installing.replace(worker) {
            previous.set_state(ServiceWorkerState::Redundant);
        }
        id
    }

    /// Transition installing to waiting.
    ///
    /// A previously waiting worker is superseded.
    pub fn install_complete(&mut self, id: ServiceWorkerId) -> Result<(), ServiceWorkerError> {
        let mut worker = self.take_installing(id)?;
        worker.set_state(ServiceWorkerState::Installed);
        if let Some(mut superseded) = self.waiting.replace(worker) {
            superseded.set_state(ServiceWorkerState::Redundant);
        }
        Ok(())
    }

    /// Discard the installing worker after a failed install.
    pub fn install_failed(
        &mut self,
        id: ServiceWorkerId,
        error: impl Into<String>,
    ) -> Result<ServiceWorker, ServiceWorkerError> {
        let mut worker = self.take_installing(id)?;
        worker.error = Some(error.into());
        worker.set_state(ServiceWorkerState::Redundant);
        Ok(worker)
    }

    fn take_installing(&mut self, id: ServiceWorkerId) -> Result<ServiceWorker, ServiceWorkerError> {
        match self.installing.take() {
            Some(worker) if worker.id == id => Ok(worker),
            other => {
                self.installing = other;
                Err(ServiceWorkerError::StateError(format!(
                    "worker {} is not installing",
                    id.raw()
                )))
            }
        }
    }

    /// Move the waiting worker to `Activating`.
    pub fn begin_activation(&mut self) -> Result<&ServiceWorker, ServiceWorkerError> {
        let worker = self.waiting.as_mut().ok_or_else(|| {
            ServiceWorkerError::StateError("no waiting worker to activate".to_string())
        })?;
        if worker.state != ServiceWorkerState::Installed {
            return Err(ServiceWorkerError::StateError(format!(
                "worker {} is {:?}, expected Installed",
                worker.id.raw(),
                worker.state
            )));
        }
        worker.set_state(ServiceWorkerState::Activating);
        Ok(&*worker)
    }

    /// Promote the activating worker. Returns the superseded active worker.
    pub fn finish_activation(&mut self) -> Result<Option<ServiceWorker>, ServiceWorkerError> {
        let mut worker = match self.waiting.take() {
            Some(worker) if worker.state == ServiceWorkerState::Activating => worker,
            other => {
                self.waiting = other;
                return Err(ServiceWorkerError::StateError(
                    "no worker is activating".to_string(),
                ));
            }
        };

        worker.set_state(ServiceWorkerState::Activated);
        let superseded = self.active.replace(worker).map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        });
        Ok(superseded)
    }

    /// Unregister: every worker becomes redundant.
    pub fn unregister(&mut self) -> Vec<ServiceWorkerId> {
        [self.active.take(), self.waiting.take(), self.installing.take()]
            .into_iter()
            .flatten()
            .map(|mut worker| {
                worker.set_state(ServiceWorkerState::Redundant);
                worker.id
            })
            .collect()
    }
}
