//! Scripted network for gateway tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use artvibe_net::{Fetcher, NetError, Request, Response};
use async_trait::async_trait;
use hashbrown::HashMap;
use http::StatusCode;

pub(crate) struct ScriptedNetwork {
    routes: Mutex<HashMap<String, (StatusCode, &'static str)>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedNetwork {
    pub(crate) fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn route(self, url: &str, status: StatusCode, body: &'static str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body));
        self
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::ConnectionFailed("offline".to_string()));
        }

        let route = self.routes.lock().unwrap().get(request.url.as_str()).copied();
        match route {
            Some((status, body)) => Ok(Response::new(request.url.clone(), status).with_body(body)),
            None => Err(NetError::ConnectionFailed(format!(
                "no route to {}",
                request.url
            ))),
        }
    }
}
