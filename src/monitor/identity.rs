//! Cluster identity used to attribute dispatched scans
//!
//! The identity is the UID of a well-known system namespace. It is read once
//! per controller start; a missing UID degrades to an empty [`ManagedBy`] tag.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{Api, Client};
use tokio::sync::OnceCell;

use super::MonitorError;

/// Default namespace whose UID identifies the cluster
pub const DEFAULT_IDENTITY_NAMESPACE: &str = "kube-system";

/// Default prefix prepended to the cluster UID
pub const DEFAULT_MANAGED_BY_PREFIX: &str = "scanwatch-operator-";

/// Source of the cluster's own identity
#[async_trait]
pub trait ClusterIdentity: Send + Sync {
    /// Read the cluster UID
    ///
    /// `Ok(None)` means the API answered but no UID is available.
    /// `Err` means the cluster API could not be reached at all.
    async fn cluster_uid(&self) -> Result<Option<String>, MonitorError>;
}

/// Reads the cluster UID from a Namespace object
#[derive(Clone)]
pub struct KubeClusterIdentity {
    api: Api<Namespace>,
    namespace: String,
}

impl KubeClusterIdentity {
    pub fn new(client: Client) -> Self {
        Self::with_namespace(client, DEFAULT_IDENTITY_NAMESPACE)
    }

    pub fn with_namespace(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            api: Api::all(client),
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl ClusterIdentity for KubeClusterIdentity {
    async fn cluster_uid(&self) -> Result<Option<String>, MonitorError> {
        let ns = self
            .api
            .get_opt(&self.namespace)
            .await
            .map_err(|e| MonitorError::ClusterUnreachable(e.to_string()))?;

        Ok(ns
            .and_then(|ns| ns.metadata.uid)
            .filter(|uid| !uid.is_empty()))
    }
}

/// Resolves the cluster UID once and shares it between controllers
///
/// Failures are not cached, so a later caller retries the lookup.
pub struct CachedClusterIdentity<I> {
    inner: I,
    uid: OnceCell<Option<String>>,
}

impl<I: ClusterIdentity> CachedClusterIdentity<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            uid: OnceCell::new(),
        }
    }
}

#[async_trait]
impl<I: ClusterIdentity> ClusterIdentity for CachedClusterIdentity<I> {
    async fn cluster_uid(&self) -> Result<Option<String>, MonitorError> {
        self.uid
            .get_or_try_init(|| self.inner.cluster_uid())
            .await
            .cloned()
    }
}

// ============================================================================
// ManagedBy Tag
// ============================================================================

/// Cluster attribution attached to every dispatched scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedBy(String);

impl ManagedBy {
    /// Tag for a resolved cluster UID, empty when there is none
    pub fn from_cluster_uid(prefix: &str, uid: Option<&str>) -> Self {
        match uid {
            Some(uid) if !uid.is_empty() => Self(format!("{prefix}{uid}")),
            _ => Self::default(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ManagedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed identity, for wiring without a cluster and for tests
#[derive(Debug, Clone, Default)]
pub struct StaticClusterIdentity(pub Option<String>);

#[async_trait]
impl ClusterIdentity for StaticClusterIdentity {
    async fn cluster_uid(&self) -> Result<Option<String>, MonitorError> {
        Ok(self.0.clone())
    }
}
