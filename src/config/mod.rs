//! Configuration management for scanwatch
//!
//! Configuration is loaded from a TOML file or from `SCANWATCH_*`
//! environment variables, then validated before anything is started.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::monitor::identity::{DEFAULT_IDENTITY_NAMESPACE, DEFAULT_MANAGED_BY_PREFIX};
use crate::monitor::key::{ResourceKind, KNOWN_KINDS};

/// Default scan-API path that schedules a single resource scan
pub const DEFAULT_SCAN_PATH: &str = "/Scan/ScheduleKubernetesResourceScan";

const REDACTED: &str = "<redacted>";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Debouncer timing
    pub debouncer: DebouncerConfig,

    /// Outbound scan dispatch
    pub dispatch: DispatchConfig,

    /// Watched resource kinds and cluster identity
    pub monitor: MonitorConfig,

    /// Scan-API topology discovery
    pub scan_api: ScanApiConfig,

    /// Health and metrics endpoint
    pub health: HealthConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Debouncer timing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebouncerConfig {
    /// Interval between drain cycles in milliseconds
    pub tick_interval_ms: u64,

    /// Maximum dispatches in flight within one drain cycle
    pub max_concurrent_dispatches: usize,
}

impl Default for DebouncerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            max_concurrent_dispatches: 8,
        }
    }
}

impl DebouncerConfig {
    /// Set the drain interval
    ///
    /// Non-zero intervals below one millisecond round up to 1 ms; a zero
    /// interval is kept so `validate` rejects it.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self.tick_interval_ms = if millis == 0 && !interval.is_zero() {
            1
        } else {
            millis
        };
        self
    }

    /// Set the dispatch concurrency bound
    pub fn with_max_concurrent_dispatches(mut self, max: usize) -> Self {
        self.max_concurrent_dispatches = max;
        self
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "debouncer.tick_interval_ms",
                "must be greater than 0",
            ));
        }

        if self.max_concurrent_dispatches == 0 {
            return Err(ConfigError::invalid(
                "debouncer.max_concurrent_dispatches",
                "must allow at least 1 dispatch",
            ));
        }

        Ok(())
    }
}

/// Outbound scan dispatch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Path appended to the scan-API endpoint
    pub scan_path: String,

    /// Bearer token for scan-API requests
    pub token: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            scan_path: String::from(DEFAULT_SCAN_PATH),
            token: None,
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Watched kinds and cluster identity configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Resource kinds to watch
    pub kinds: Vec<String>,

    /// Namespace whose UID identifies the cluster
    pub identity_namespace: String,

    /// Prefix for the ManagedBy tag
    pub managed_by_prefix: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            kinds: KNOWN_KINDS.iter().map(|k| k.to_string()).collect(),
            identity_namespace: String::from(DEFAULT_IDENTITY_NAMESPACE),
            managed_by_prefix: String::from(DEFAULT_MANAGED_BY_PREFIX),
        }
    }
}

/// Scan-API discovery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanApiConfig {
    /// Label selector matching scan-API Services
    pub label_selector: String,

    /// Port override; the first Service port is used otherwise
    pub port: Option<u16>,

    /// Namespace whose scan API also serves cluster-scoped resources
    pub cluster_scope_namespace: Option<String>,
}

impl Default for ScanApiConfig {
    fn default() -> Self {
        Self {
            label_selector: String::from("app.kubernetes.io/name=scan-api"),
            port: None,
            cluster_scope_namespace: None,
        }
    }
}

/// Health endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub bind_address: SocketAddr,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8081)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let tick_interval_ms = env_parse("SCANWATCH_TICK_INTERVAL_MS")?
            .unwrap_or(defaults.debouncer.tick_interval_ms);

        let max_concurrent_dispatches = env_parse("SCANWATCH_MAX_CONCURRENT_DISPATCHES")?
            .unwrap_or(defaults.debouncer.max_concurrent_dispatches);

        let request_timeout_secs = env_parse("SCANWATCH_REQUEST_TIMEOUT")?
            .unwrap_or(defaults.dispatch.request_timeout_secs);

        let scan_path =
            std::env::var("SCANWATCH_SCAN_PATH").unwrap_or(defaults.dispatch.scan_path);

        let token = std::env::var("SCANWATCH_SCAN_API_TOKEN").ok();

        let kinds = std::env::var("SCANWATCH_KINDS")
            .map(|v| {
                v.split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.monitor.kinds);

        let identity_namespace = std::env::var("SCANWATCH_IDENTITY_NAMESPACE")
            .unwrap_or(defaults.monitor.identity_namespace);

        let managed_by_prefix = std::env::var("SCANWATCH_MANAGED_BY_PREFIX")
            .unwrap_or(defaults.monitor.managed_by_prefix);

        let label_selector = std::env::var("SCANWATCH_SCAN_API_SELECTOR")
            .unwrap_or(defaults.scan_api.label_selector);

        let port = env_parse("SCANWATCH_SCAN_API_PORT")?;

        let cluster_scope_namespace = std::env::var("SCANWATCH_CLUSTER_SCOPE_NAMESPACE").ok();

        let health_enabled = env_parse("SCANWATCH_HEALTH_ENABLED")?
            .unwrap_or(defaults.health.enabled);

        let bind_address = env_parse("SCANWATCH_HEALTH_BIND")?
            .unwrap_or(defaults.health.bind_address);

        let level = std::env::var("SCANWATCH_LOG_LEVEL").unwrap_or(defaults.logging.level);
        let format = std::env::var("SCANWATCH_LOG_FORMAT").unwrap_or(defaults.logging.format);

        Ok(Self {
            debouncer: DebouncerConfig {
                tick_interval_ms,
                max_concurrent_dispatches,
            },
            dispatch: DispatchConfig {
                request_timeout_secs,
                scan_path,
                token,
            },
            monitor: MonitorConfig {
                kinds,
                identity_namespace,
                managed_by_prefix,
            },
            scan_api: ScanApiConfig {
                label_selector,
                port,
                cluster_scope_namespace,
            },
            health: HealthConfig {
                enabled: health_enabled,
                bind_address,
            },
            logging: LoggingConfig { level, format },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Copy of this configuration with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.dispatch.token.is_some() {
            config.dispatch.token = Some(REDACTED.to_string());
        }
        config
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.debouncer.validate()?;

        if self.dispatch.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "dispatch.request_timeout_secs",
                "must be greater than 0",
            ));
        }

        if !self.dispatch.scan_path.starts_with('/') {
            return Err(ConfigError::invalid(
                "dispatch.scan_path",
                "must start with '/'",
            ));
        }

        if self.monitor.kinds.is_empty() {
            return Err(ConfigError::invalid(
                "monitor.kinds",
                "at least one resource kind must be watched",
            ));
        }

        for kind in &self.monitor.kinds {
            ResourceKind::from_config(kind).map_err(|_| {
                ConfigError::invalid(
                    "monitor.kinds",
                    format!(
                        "unknown kind '{kind}'. Valid options: {}",
                        KNOWN_KINDS.join(", ")
                    ),
                )
            })?;
        }

        if self.monitor.identity_namespace.is_empty() {
            return Err(ConfigError::MissingField {
                field: "monitor.identity_namespace".to_string(),
            });
        }

        if self.scan_api.label_selector.is_empty() {
            return Err(ConfigError::MissingField {
                field: "scan_api.label_selector".to_string(),
            });
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("Invalid value for {name}: {raw}")),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
