//! Push payloads and system notifications.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::NotificationDefaults;
use crate::ServiceWorkerError;

/// Push message body. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl PushPayload {
    /// Parse push data. Missing or malformed data yields an empty payload.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let Some(data) = data else {
            return Self::default();
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Self::default();
        }

        let fields = match serde_json::from_slice::<Value>(data) {
            Ok(Value::Object(fields)) => fields,
            Ok(other) => {
                warn!(kind = json_kind(&other), "Push payload is not an object, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(error = %e, "Malformed push payload, using defaults");
                return Self::default();
            }
        };

        // A field of the wrong type is dropped on its own; the rest survive.
        let field = |name: &str| match fields.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                warn!(field = name, kind = json_kind(other), "Ignoring push field");
                None
            }
        };
        Self {
            title: field("title"),
            body: field("body"),
            url: field("url"),
        }
    }

    /// Title and options to display, with `defaults` filling gaps.
    pub fn to_notification(&self, defaults: &NotificationDefaults) -> (String, NotificationOptions) {
        let title = non_empty(&self.title).unwrap_or(&defaults.title).to_string();
        let options = NotificationOptions {
            body: non_empty(&self.body).unwrap_or(&defaults.body).to_string(),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            data: NotificationData {
                url: non_empty(&self.url).unwrap_or(&defaults.url).to_string(),
            },
        };
        (title, options)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn non_empty(field: &Option<String>) -> Option<&String> {
    field.as_ref().filter(|s| !s.is_empty())
}

/// Data attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
}

/// Notification options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub data: NotificationData,
}

/// Notification identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A displayed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub options: NotificationOptions,
}

/// The platform's notification surface.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Schedule a notification. Resolves once it is scheduled.
    async fn show_notification(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<Notification, ServiceWorkerError>;

    /// Dismiss a notification.
    async fn close(&self, id: NotificationId);
}

/// In-memory notification surface.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    shown: RwLock<Vec<Notification>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications currently displayed, oldest first.
    pub async fn displayed(&self) -> Vec<Notification> {
        self.shown.read().await.clone()
    }
}

#[async_trait]
impl Notifier for NotificationCenter {
    async fn show_notification(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<Notification, ServiceWorkerError> {
        if title.is_empty() {
            return Err(ServiceWorkerError::NotificationError(
                "notification title is empty".to_string(),
            ));
        }

        let notification = Notification {
            id: NotificationId::next(),
            title: title.to_string(),
            options,
        };
        debug!(id = notification.id.raw(), title, "Notification shown");
        self.shown.write().await.push(notification.clone());
        Ok(notification)
    }

    async fn close(&self, id: NotificationId) {
        self.shown.write().await.retain(|n| n.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_payload() {
        let payload = PushPayload::parse(Some(
            br#"{"title":"Order Update","body":"Shipped","url":"/orders/1"}"#,
        ));
        assert_eq!(payload.title.as_deref(), Some("Order Update"));
        assert_eq!(payload.body.as_deref(), Some("Shipped"));
        assert_eq!(payload.url.as_deref(), Some("/orders/1"));
    }

    #[test]
    fn test_parse_absent_and_blank() {
        assert_eq!(PushPayload::parse(None), PushPayload::default());
        assert_eq!(PushPayload::parse(Some(b"  \n")), PushPayload::default());
    }

    #[test]
    fn test_parse_malformed_is_empty() {
        assert_eq!(PushPayload::parse(Some(b"{title:")), PushPayload::default());
        assert_eq!(PushPayload::parse(Some(b"[1,2,3]")), PushPayload::default());
    }

    #[test]
    fn test_wrong_typed_field_keeps_the_others() {
        let payload = PushPayload::parse(Some(br#"{"title":5,"body":"Shipped","url":null}"#));
        assert!(payload.title.is_none());
        assert_eq!(payload.body.as_deref(), Some("Shipped"));
        assert!(payload.url.is_none());

        let (title, options) = payload.to_notification(&NotificationDefaults::default());
        assert_eq!(title, "ArtVibeStudio Update");
        assert_eq!(options.body, "Shipped");
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let payload = PushPayload::parse(Some(br#"{"title":"Sale","priority":5}"#));
        assert_eq!(payload.title.as_deref(), Some("Sale"));
        assert!(payload.body.is_none());
    }

    #[test]
    fn test_defaults_fill_missing_and_empty_fields() {
        let defaults = NotificationDefaults::default();
        let payload = PushPayload {
            title: Some(String::new()),
            body: Some("Shipped".to_string()),
            url: None,
        };

        let (title, options) = payload.to_notification(&defaults);
        assert_eq!(title, "ArtVibeStudio Update");
        assert_eq!(options.body, "Shipped");
        assert_eq!(options.data.url, "https://artvibestudio.store");
        assert_eq!(options.icon, "/favicon.ico");
        assert_eq!(options.badge, "/favicon.ico");
    }

    #[test]
    fn test_options_wire_format() {
        let (_, options) = PushPayload::default().to_notification(&NotificationDefaults::default());
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["data"]["url"], "https://artvibestudio.store");
        assert_eq!(json["icon"], "/favicon.ico");
    }

    #[tokio::test]
    async fn test_notification_center_show_and_close() {
        let center = NotificationCenter::new();
        let (title, options) =
            PushPayload::default().to_notification(&NotificationDefaults::default());

        let shown = center.show_notification(&title, options).await.unwrap();
        assert_eq!(center.displayed().await.len(), 1);

        center.close(shown.id).await;
        assert!(center.displayed().await.is_empty());
    }
}
