//! Registry of live scan-API endpoints
//!
//! Maps a namespace to the scan-API instance responsible for it. The empty
//! namespace is the cluster scope, used for cluster-scoped resources.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use url::Url;

use crate::metrics;

// ============================================================================
// Scan Target
// ============================================================================

/// Endpoint of a scan-API instance
#[derive(Clone, PartialEq, Eq)]
pub struct ScanTarget {
    /// Base URL of the scan API
    pub endpoint: Url,

    /// Bearer token sent with scan requests
    pub token: Option<String>,

    /// When this target was registered or last replaced
    pub registered_at: DateTime<Utc>,
}

impl ScanTarget {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            token: None,
            registered_at: Utc::now(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl fmt::Debug for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanTarget")
            .field("endpoint", &self.endpoint.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

// ============================================================================
// Scan API Store
// ============================================================================

/// Concurrency-safe directory of scan targets keyed by namespace
///
/// Targets are stored behind `Arc` and replaced whole, so a reader holding a
/// looked-up target never sees a mix of old and new fields.
#[derive(Default)]
pub struct ScanApiStore {
    targets: RwLock<HashMap<String, Arc<ScanTarget>>>,
}

impl ScanApiStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the target for a namespace
    pub async fn upsert(&self, namespace: impl Into<String>, target: ScanTarget) {
        let namespace = namespace.into();
        let mut targets = self.targets.write().await;

        tracing::debug!(
            namespace = %namespace,
            endpoint = %target.endpoint,
            "Registering scan target"
        );

        targets.insert(namespace, Arc::new(target));
        metrics::set_scan_targets(targets.len());
    }

    /// Drop the target for a namespace, returning it if present
    pub async fn remove(&self, namespace: &str) -> Option<Arc<ScanTarget>> {
        let mut targets = self.targets.write().await;
        let removed = targets.remove(namespace);

        if removed.is_some() {
            tracing::debug!(namespace = %namespace, "Removed scan target");
        }

        metrics::set_scan_targets(targets.len());
        removed
    }

    /// Drop the target for a namespace only if it still points at `endpoint`
    pub async fn remove_endpoint(&self, namespace: &str, endpoint: &Url) -> bool {
        let mut targets = self.targets.write().await;

        let matches = targets
            .get(namespace)
            .is_some_and(|t| &t.endpoint == endpoint);
        if matches {
            targets.remove(namespace);
            metrics::set_scan_targets(targets.len());
        }
        matches
    }

    /// Keep only the given namespaces, dropping everything else
    pub async fn retain_namespaces(&self, keep: &HashSet<String>) -> usize {
        let mut targets = self.targets.write().await;
        let before = targets.len();
        targets.retain(|ns, _| keep.contains(ns));
        metrics::set_scan_targets(targets.len());
        before - targets.len()
    }

    /// Find the target responsible for a namespace
    pub async fn lookup(&self, namespace: &str) -> Option<Arc<ScanTarget>> {
        self.targets.read().await.get(namespace).cloned()
    }

    pub async fn len(&self) -> usize {
        self.targets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.targets.read().await.is_empty()
    }

    /// Snapshot of registered namespaces, sorted
    pub async fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.targets.read().await.keys().cloned().collect();
        namespaces.sort();
        namespaces
    }
}

// ============================================================================
// Tests
// ============================================================================
