//! Cache storage: named generations of request/response pairs.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use artvibe_net::{Request, Response};
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::ServiceWorkerError;

/// Cache storage shared by every concurrently running handler.
pub type SharedCacheStorage = Arc<RwLock<CacheStorage>>;

/// Cache lookup key: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        Self {
            method: method.as_str().to_string(),
            url: url.as_str().to_string(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn for_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for `request`.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: request.url.as_str().to_string(),
            method: request.method.as_str().to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: now_millis(),
        }
    }

    pub fn key(&self) -> RequestKey {
        RequestKey {
            method: self.method.clone(),
            url: self.url.clone(),
        }
    }

    /// Rebuild the stored response.
    pub fn to_response(&self) -> Result<Response, ServiceWorkerError> {
        let url = Url::parse(&self.url)
            .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {e}", self.url)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ServiceWorkerError::CacheError(format!("status {}: {e}", self.status)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }

        Ok(Response {
            url,
            status,
            headers,
            body: Bytes::from(self.body.clone()),
        })
    }
}

/// One cache generation.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    /// Create a new, empty cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Store a copy of `response` under `request`.
    ///
    /// Only GET requests can be stored, and partial (206) responses are
    /// rejected.
    pub fn put(&mut self, request: &Request, response: &Response) -> Result<(), ServiceWorkerError> {
        if request.method != Method::GET {
            return Err(ServiceWorkerError::CacheError(format!(
                "cannot cache {} request for {}",
                request.method, request.url
            )));
        }
        if response.status == StatusCode::PARTIAL_CONTENT {
            return Err(ServiceWorkerError::CacheError(format!(
                "partial response for {}",
                request.url
            )));
        }

        let entry = CacheEntry::from_response(request, response);
        self.entries.insert(entry.key(), entry);
        Ok(())
    }

    fn insert_entry(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// All keys, sorted by URL.
    pub fn keys(&self) -> Vec<&RequestKey> {
        let mut keys: Vec<&RequestKey> = self.entries.keys().collect();
        keys.sort_by(|a, b| a.url.cmp(&b.url).then_with(|| a.method.cmp(&b.method)));
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache storage (the `caches` global).
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap for sharing between handlers.
    pub fn shared(self) -> SharedCacheStorage {
        Arc::new(RwLock::new(self))
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up `key` in the named cache only.
    pub fn match_in(&self, name: &str, key: &RequestKey) -> Option<&CacheEntry> {
        self.caches.get(name).and_then(|cache| cache.match_request(key))
    }

    /// Merge a fully populated generation into storage in one step.
    ///
    /// Entries already stored under the same name are kept unless the new
    /// generation overwrites them.
    pub fn publish(&mut self, generation: Cache) {
        let name = generation.name.clone();
        let added = generation.len();
        let target = self.open(&name);
        for (_, entry) in generation.entries {
            target.insert_entry(entry);
        }
        debug!(cache = %name, added, total = target.len(), "Published cache generation");
    }

    /// Write every generation to a JSON snapshot.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<(), ServiceWorkerError> {
        let path = path.as_ref();
        let snapshot = StorageSnapshot {
            generations: self
                .keys()
                .into_iter()
                .filter_map(|name| self.caches.get(&name))
                .map(|cache| GenerationSnapshot {
                    name: cache.name.clone(),
                    entries: cache
                        .keys()
                        .into_iter()
                        .filter_map(|key| cache.entries.get(key).cloned())
                        .collect(),
                })
                .collect(),
        };

        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| {
            ServiceWorkerError::CacheError(format!("write {}: {e}", path.display()))
        })?;

        debug!(path = %path.display(), generations = snapshot.generations.len(), "Saved cache snapshot");
        Ok(())
    }

    /// Load a JSON snapshot. A missing file yields empty storage.
    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self, ServiceWorkerError> {
        let path = path.as_ref();
        let json = match std::fs::read(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => {
                return Err(ServiceWorkerError::CacheError(format!(
                    "read {}: {e}",
                    path.display()
                )))
            }
        };

        let snapshot: StorageSnapshot = serde_json::from_slice(&json)
            .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {e}", path.display())))?;

        let mut storage = Self::new();
        for generation in snapshot.generations {
            let cache = storage.open(&generation.name);
            for entry in generation.entries {
                cache.insert_entry(entry);
            }
        }
        Ok(storage)
    }
}

#[derive(Serialize, Deserialize)]
struct StorageSnapshot {
    generations: Vec<GenerationSnapshot>,
}

#[derive(Serialize, Deserialize)]
struct GenerationSnapshot {
    name: String,
    entries: Vec<CacheEntry>,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
