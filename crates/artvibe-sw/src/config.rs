//! Gateway configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Offline gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Site origin; relative manifest entries resolve against it
    pub origin: String,

    /// Cache generation prefix
    pub cache_prefix: String,

    /// Cache generation version. Bumping it invalidates every older generation.
    pub cache_version: String,

    /// Resources pre-cached at install, in order
    pub manifest: Vec<String>,

    /// Application shell served when the network is unreachable
    pub shell_path: String,

    /// Activate as soon as install succeeds
    pub skip_waiting: bool,

    /// Push notification defaults
    pub notifications: NotificationDefaults,
}

/// Values used when a push payload omits a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub url: String,
    pub icon: String,
    pub badge: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            origin: "https://artvibestudio.store/".to_string(),
            cache_prefix: "artvibestudio-cache".to_string(),
            cache_version: "2".to_string(),
            manifest: [
                "/",
                "/index.html",
                "/style.css",
                "/script.js",
                "/service-worker.js",
                "/favicon.ico",
                "/images/phone-mockup.webp",
                "/images/wallpaper.webp",
                "/images/stickers.webp",
                "/images/printable.webp",
                "/images/avatar.webp",
                "https://fonts.googleapis.com/css2?family=Poppins:wght@400;500;700&family=Montserrat:wght@600;800&display=swap",
                "https://cdn.jsdelivr.net/npm/tailwindcss@2.2.19/dist/tailwind.min.css",
                "https://unpkg.com/swiper/swiper-bundle.min.css",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            shell_path: "/index.html".to_string(),
            skip_waiting: true,
            notifications: NotificationDefaults::default(),
        }
    }
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "ArtVibeStudio Update".to_string(),
            body: "You have a new notification from ArtVibeStudio!".to_string(),
            url: "https://artvibestudio.store".to_string(),
            icon: "/favicon.ico".to_string(),
            badge: "/favicon.ico".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Name of the current cache generation, e.g. `artvibestudio-cache-v2`.
    pub fn cache_name(&self) -> String {
        format!("{}-v{}", self.cache_prefix, self.cache_version)
    }

    /// Parsed origin.
    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        let origin = Url::parse(&self.origin)
            .map_err(|e| ConfigError::Invalid(format!("origin {}: {e}", self.origin)))?;
        match origin.scheme() {
            "http" | "https" => Ok(origin),
            other => Err(ConfigError::Invalid(format!(
                "origin must be http or https, got {other}"
            ))),
        }
    }

    /// Resolve an absolute or origin-relative URL.
    pub fn resolve(&self, url: &str) -> Result<Url, ConfigError> {
        self.origin_url()?
            .join(url)
            .map_err(|e| ConfigError::Invalid(format!("{url}: {e}")))
    }

    /// Manifest entries as absolute URLs, in manifest order.
    pub fn manifest_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.manifest.iter().map(|entry| self.resolve(entry)).collect()
    }

    /// Absolute URL of the application shell.
    pub fn shell_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&self.shell_path)
    }

    /// Check the config is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_prefix.trim().is_empty() || self.cache_version.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "cache_prefix and cache_version must be non-empty".to_string(),
            ));
        }
        self.manifest_urls()?;
        self.shell_url()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_matches_storefront() {
        let config = GatewayConfig::default();
        assert_eq!(config.cache_name(), "artvibestudio-cache-v2");
        assert_eq!(config.manifest.len(), 14);
        assert!(config.skip_waiting);
        config.validate().unwrap();
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let config = GatewayConfig::default();
        assert_eq!(
            config.resolve("/orders/1").unwrap().as_str(),
            "https://artvibestudio.store/orders/1"
        );
        assert_eq!(
            config
                .resolve("https://unpkg.com/swiper/swiper-bundle.min.css")
                .unwrap()
                .host_str(),
            Some("unpkg.com")
        );
        assert_eq!(
            config.shell_url().unwrap().as_str(),
            "https://artvibestudio.store/index.html"
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            GatewayConfig::from_json_str(r#"{ "cache_version": "3", "manifest": ["/"] }"#).unwrap();
        assert_eq!(config.cache_name(), "artvibestudio-cache-v3");
        assert_eq!(config.manifest, vec!["/".to_string()]);
        assert_eq!(config.notifications.title, "ArtVibeStudio Update");
    }

    #[test]
    fn test_rejects_non_http_origin() {
        let err = GatewayConfig::from_json_str(r#"{ "origin": "file:///srv/site/" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_empty_version() {
        let err = GatewayConfig::from_json_str(r#"{ "cache_version": "" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "origin": "http://localhost:8080/", "skip_waiting": false }}"#
        )
        .unwrap();

        let config = GatewayConfig::load(file.path()).unwrap();
        assert_eq!(config.origin, "http://localhost:8080/");
        assert!(!config.skip_waiting);
    }

    #[test]
    fn test_load_missing_file() {
        let err = GatewayConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
