//! Scan-API topology
//!
//! [`ScanApiStore`] answers "which scan API handles namespace X" for the
//! debouncer. [`ScanApiWatcher`] keeps it current from labelled Services.

pub mod store;
pub mod watcher;

pub use store::{ScanApiStore, ScanTarget};
pub use watcher::{service_endpoint, ScanApiSync, ScanApiWatcher};
