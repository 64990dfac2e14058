//! Event-driven worker: every event runs as its own task and is tracked
//! until it settles.

use std::sync::Arc;

use artvibe_net::Request;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::gateway::{ActivationReport, ClickOutcome, GatewayResponse, InstallOutcome, OfflineGateway};
use crate::notification::Notification;
use crate::ServiceWorkerError;

type Reply<T> = oneshot::Sender<Result<T, ServiceWorkerError>>;

/// Events delivered to the gateway.
#[derive(Debug)]
pub enum GatewayEvent {
    Install {
        reply: Option<Reply<InstallOutcome>>,
    },
    Activate {
        reply: Option<Reply<ActivationReport>>,
    },
    Fetch {
        request: Request,
        reply: Reply<GatewayResponse>,
    },
    Push {
        data: Option<Bytes>,
        reply: Option<Reply<Notification>>,
    },
    NotificationClick {
        notification: Notification,
        reply: Option<Reply<ClickOutcome>>,
    },
}

impl GatewayEvent {
    fn name(&self) -> &'static str {
        match self {
            GatewayEvent::Install { .. } => "install",
            GatewayEvent::Activate { .. } => "activate",
            GatewayEvent::Fetch { .. } => "fetch",
            GatewayEvent::Push { .. } => "push",
            GatewayEvent::NotificationClick { .. } => "notificationclick",
        }
    }
}

/// Runs the gateway's event loop.
pub struct GatewayWorker;

impl GatewayWorker {
    /// Spawn the event loop on the current runtime.
    pub fn spawn(gateway: Arc<OfflineGateway>) -> GatewayHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(gateway, rx));
        GatewayHandle { tx, task }
    }
}

async fn run(gateway: Arc<OfflineGateway>, mut rx: mpsc::UnboundedReceiver<GatewayEvent>) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    debug!(event = event.name(), in_flight = in_flight.len(), "Dispatching event");
                    in_flight.spawn(dispatch(Arc::clone(&gateway), event));
                }
                None => break,
            },
            Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = finished {
                    error!(error = %e, "Event handler aborted");
                }
            }
        }
    }

    if !in_flight.is_empty() {
        info!(in_flight = in_flight.len(), "Draining in-flight events");
    }
    while let Some(finished) = in_flight.join_next().await {
        if let Err(e) = finished {
            error!(error = %e, "Event handler aborted");
        }
    }
    debug!("Gateway worker stopped");
}

async fn dispatch(gateway: Arc<OfflineGateway>, event: GatewayEvent) {
    match event {
        GatewayEvent::Install { reply } => {
            respond(reply, gateway.on_install().await);
        }
        GatewayEvent::Activate { reply } => {
            respond(reply, gateway.activate().await);
        }
        GatewayEvent::Fetch { request, reply } => {
            respond(Some(reply), gateway.handle_fetch(&request).await);
        }
        GatewayEvent::Push { data, reply } => {
            respond(reply, gateway.handle_push(data.as_deref()).await);
        }
        GatewayEvent::NotificationClick {
            notification,
            reply,
        } => {
            respond(reply, gateway.handle_notification_click(&notification).await);
        }
    }
}

fn respond<T>(reply: Option<Reply<T>>, result: Result<T, ServiceWorkerError>) {
    match reply {
        Some(reply) => {
            if reply.send(result).is_err() {
                debug!("Event caller went away before the reply");
            }
        }
        None => {
            if let Err(e) = result {
                warn!(error = %e, "Event failed");
            }
        }
    }
}

/// Sends events to a running [`GatewayWorker`].
pub struct GatewayHandle {
    tx: mpsc::UnboundedSender<GatewayEvent>,
    task: JoinHandle<()>,
}

impl GatewayHandle {
    /// Deliver an event without waiting for it.
    pub fn dispatch(&self, event: GatewayEvent) -> Result<(), ServiceWorkerError> {
        self.tx
            .send(event)
            .map_err(|_| ServiceWorkerError::WorkerStopped)
    }

    async fn call<T>(
        &self,
        event: impl FnOnce(Reply<T>) -> GatewayEvent,
    ) -> Result<T, ServiceWorkerError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(event(reply))?;
        rx.await.map_err(|_| ServiceWorkerError::WorkerStopped)?
    }

    pub async fn install(&self) -> Result<InstallOutcome, ServiceWorkerError> {
        self.call(|reply| GatewayEvent::Install { reply: Some(reply) })
            .await
    }

    pub async fn activate(&self) -> Result<ActivationReport, ServiceWorkerError> {
        self.call(|reply| GatewayEvent::Activate { reply: Some(reply) })
            .await
    }

    pub async fn fetch(&self, request: Request) -> Result<GatewayResponse, ServiceWorkerError> {
        self.call(|reply| GatewayEvent::Fetch { request, reply }).await
    }

    pub async fn push(&self, data: Option<Bytes>) -> Result<Notification, ServiceWorkerError> {
        self.call(|reply| GatewayEvent::Push {
            data,
            reply: Some(reply),
        })
        .await
    }

    pub async fn notification_click(
        &self,
        notification: Notification,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        self.call(|reply| GatewayEvent::NotificationClick {
            notification,
            reply: Some(reply),
        })
        .await
    }

    /// Stop taking events and wait for every in-flight handler to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            error!(error = %e, "Gateway worker panicked");
        }
    }
}
