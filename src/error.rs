//! Unified error handling for the scanwatch crate
//!
//! Domain errors stay in their modules; [`Error`] wraps them so startup code
//! can propagate any of them with `?`.
//!
//! Only startup errors are meant to reach the top of the process. The drain
//! loop absorbs dispatch failures and reports them through logs and metrics.
//!
//! # Usage
//!
//! ```rust,ignore
//! use scanwatch::error::{Error, ScanwatchErrorTrait};
//!
//! fn report(err: &Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!("transient: {}", err);
//!     } else {
//!         tracing::error!("fatal: {}", err);
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::debouncer::{DebouncerError, DispatchError};
pub use crate::monitor::MonitorError;

/// Common trait for all scanwatch error types
pub trait ScanwatchErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout)
    Network,
    /// Kubernetes API errors
    Cluster,
    /// Configuration and validation errors
    Config,
    /// Scan dispatch errors
    Dispatch,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Cluster => "cluster",
            Self::Config => "config",
            Self::Dispatch => "dispatch",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the scanwatch crate
#[derive(Error, Debug)]
pub enum Error {
    /// Resource monitor errors (kind resolution, cluster identity)
    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Debouncer error: {0}")]
    Debouncer(#[from] DebouncerError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Kubernetes client errors
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ScanwatchErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Monitor(e) => matches!(e, MonitorError::ClusterUnreachable(_)),
            Self::Debouncer(_) => false,
            Self::Dispatch(e) => e.is_recoverable(),
            Self::Config(_) => false,
            Self::Kube(_) => true,
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Http(_) => true,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Monitor(MonitorError::ClusterUnreachable(_)) | Self::Kube(_) => {
                ErrorCategory::Cluster
            }
            Self::Monitor(_) | Self::Config(_) => ErrorCategory::Config,
            Self::Dispatch(_) => ErrorCategory::Dispatch,
            Self::Http(_) | Self::Io(_) => ErrorCategory::Network,
            Self::Debouncer(_) | Self::Json(_) | Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
