//! # ArtVibe Common
//!
//! Shared error type and logging configuration for the ArtVibe offline gateway.
//!
//! ## Features
//!
//! - Unified error type with a category per failure class
//! - Logging configuration and setup
//! - Result extension traits

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};

/// Unified error type for the gateway crates.
///
/// Crate-local errors (`NetError`, `ServiceWorkerError`) convert into this
/// when they cross into the tool layer.
#[derive(Error, Debug)]
pub enum ArtVibeError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache storage errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Lifecycle errors (install, activate, state transitions).
    #[error("Lifecycle error: {message}")]
    Lifecycle {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Notification and client errors.
    #[error("Notification error: {message}")]
    Notification {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl ArtVibeError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Create a lifecycle error.
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
            source: None,
        }
    }

    /// Create a lifecycle error with source.
    pub fn lifecycle_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Lifecycle {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a notification error.
    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an internal error with backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Whether a later attempt could succeed.
    ///
    /// The gateway never retries on its own; this only informs callers such
    /// as the CLI whether re-running the command makes sense.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArtVibeError::Network { .. } | ArtVibeError::Io(_))
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            ArtVibeError::Network { .. } => "network",
            ArtVibeError::Cache { .. } => "cache",
            ArtVibeError::Lifecycle { .. } => "lifecycle",
            ArtVibeError::Notification { .. } => "notification",
            ArtVibeError::Config { .. } => "config",
            ArtVibeError::Io(_) => "io",
            ArtVibeError::NotFound(_) => "not_found",
            ArtVibeError::InvalidArgument(_) => "invalid_argument",
            ArtVibeError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, ArtVibeError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Convert to a different error type.
    fn map_err_to<E: Into<ArtVibeError>>(self, f: impl FnOnce() -> E) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| ArtVibeError::Internal {
            message: format!("{}: {}", message.into(), e),
            backtrace: Some(backtrace::Backtrace::new()),
        })
    }

    fn map_err_to<E2: Into<ArtVibeError>>(self, f: impl FnOnce() -> E2) -> Result<T> {
        self.map_err(|_| f().into())
    }
}

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| ArtVibeError::NotFound(resource.into()))
    }
}
