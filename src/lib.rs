//! scanwatch - Debounced scan dispatch for Kubernetes resource changes
//!
//! Watches workload resources in a cluster and asks the scan API responsible
//! for each namespace to rescan whatever changed. Bursts of changes to the
//! same resource collapse into a single scan request per tick.
//!
//! # Architecture
//!
//! - [`monitor`] - Resource watches turning cluster events into keys
//! - [`debouncer`] - Pending key set, periodic drain and scan dispatch
//! - [`scan_api`] - Namespace to scan-API endpoint registry and its watcher
//! - [`manager`] - Lifetime management for long-running tasks
//! - [`health`] - Liveness, readiness and metrics endpoints
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use scanwatch::config::Config;
//! use scanwatch::debouncer::{Debouncer, HttpScanDispatcher};
//! use scanwatch::scan_api::ScanApiStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(ScanApiStore::default());
//!     let dispatcher = Arc::new(HttpScanDispatcher::from_config(&config.dispatch)?);
//!     let debouncer = Arc::new(Debouncer::new(store, dispatcher, config.debouncer));
//!     // register monitors with a Manager and run it
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod debouncer;
pub mod error;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod monitor;
pub mod scan_api;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::debouncer::{Debouncer, DebouncerState, ScanDispatcher, ScanRequest};
    pub use crate::error::{Error, ErrorCategory, Result, ScanwatchErrorTrait};
    pub use crate::manager::{Manager, Runnable};
    pub use crate::monitor::{ManagedBy, ResourceKey, ResourceKind, ResourceMonitorController};
    pub use crate::scan_api::{ScanApiStore, ScanTarget};
}

pub use error::{Error, Result};
