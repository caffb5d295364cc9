//! Outbound scan-trigger requests
//!
//! One request per coalesced key per drain cycle. There is no retry here:
//! a failed dispatch is re-armed by the next real event for the resource.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::DispatchConfig;
use crate::monitor::identity::ManagedBy;
use crate::monitor::key::ResourceKey;
use crate::scan_api::ScanTarget;

// ============================================================================
// Scan Request
// ============================================================================

/// Payload sent to a scan API to scan one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub resource_key: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub managed_by: String,
}

impl ScanRequest {
    pub fn new(key: &ResourceKey, managed_by: &ManagedBy) -> Self {
        Self {
            resource_key: key.to_string(),
            kind: key.kind().to_string(),
            namespace: key.namespace().to_string(),
            name: key.name().to_string(),
            managed_by: managed_by.as_str().to_string(),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Sends a scan request to a scan target
#[async_trait]
pub trait ScanDispatcher: Send + Sync {
    async fn dispatch(&self, target: &ScanTarget, request: &ScanRequest)
        -> Result<(), DispatchError>;
}

/// HTTP dispatcher posting JSON to the scan API
pub struct HttpScanDispatcher {
    http_client: Client,
    scan_path: String,
    default_token: Option<String>,
}

impl HttpScanDispatcher {
    /// Create a dispatcher with the default path and timeout
    pub fn new() -> Result<Self, DispatchError> {
        Self::from_config(&DispatchConfig::default())
    }

    pub fn from_config(config: &DispatchConfig) -> Result<Self, DispatchError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(5))
            .user_agent(format!("scanwatch/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DispatchError::Init(e.to_string()))?;

        Ok(Self {
            http_client,
            scan_path: config.scan_path.clone(),
            default_token: config.token.clone(),
        })
    }

    fn url_for(&self, target: &ScanTarget) -> Result<url::Url, DispatchError> {
        target
            .endpoint
            .join(&self.scan_path)
            .map_err(|e| DispatchError::InvalidUrl(format!("{}: {e}", target.endpoint)))
    }
}

#[async_trait]
impl ScanDispatcher for HttpScanDispatcher {
    async fn dispatch(
        &self,
        target: &ScanTarget,
        request: &ScanRequest,
    ) -> Result<(), DispatchError> {
        let url = self.url_for(target)?;

        let mut builder = self.http_client.post(url).json(request);
        if let Some(token) = target.token.as_ref().or(self.default_token.as_ref()) {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Timeout
            } else {
                DispatchError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DispatchError::Http {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Scan dispatch errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// HTTP client could not be built
    #[error("Initialization error: {0}")]
    Init(String),

    /// Endpoint and path do not form a valid URL
    #[error("Invalid scan URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    /// Scan API answered with a non-success status
    #[error("HTTP error ({status}): {message}")]
    Http { status: u16, message: String },
}

impl DispatchError {
    /// Whether a later attempt could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Init(_) | Self::InvalidUrl(_) => false,
            Self::Network(_) | Self::Timeout => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
