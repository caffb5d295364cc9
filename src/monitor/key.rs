//! Resource identity for watched cluster objects
//!
//! A [`ResourceKey`] is the `{kind}:{namespace}:{name}` triple that the
//! debouncer coalesces on. Kubernetes names and namespaces never contain `:`,
//! so the rendered form is unambiguous and can be parsed back.

use std::fmt;

use kube::Resource;
use serde::{Deserialize, Serialize};

use super::MonitorError;

// ============================================================================
// Resource Kind
// ============================================================================

/// Canonical lowercase kind name of a watched resource type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKind(String);

/// Kinds the operator knows how to watch out of the box
pub const KNOWN_KINDS: &[&str] = &[
    "pod",
    "deployment",
    "daemonset",
    "statefulset",
    "replicaset",
    "job",
    "cronjob",
    "node",
];

impl ResourceKind {
    /// Resolve the kind of a `kube` resource type
    ///
    /// Dynamic resources (e.g. `DynamicObject`) carry their kind in the
    /// dynamic type; an empty kind means the type cannot be identified.
    pub fn of<K: Resource>(dt: &K::DynamicType) -> Result<Self, MonitorError> {
        let kind = K::kind(dt);
        Self::new(kind.as_ref())
    }

    /// Build a kind from a raw name, normalizing to lowercase
    pub fn new(name: &str) -> Result<Self, MonitorError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MonitorError::UnknownKind(String::from("<empty>")));
        }
        if name.contains(':') {
            return Err(MonitorError::UnknownKind(name.to_string()));
        }
        Ok(Self(name.to_ascii_lowercase()))
    }

    /// Build a kind from a configured name, accepting only [`KNOWN_KINDS`]
    pub fn from_config(name: &str) -> Result<Self, MonitorError> {
        let kind = Self::new(name)?;
        if KNOWN_KINDS.contains(&kind.as_str()) {
            Ok(kind)
        } else {
            Err(MonitorError::UnknownKind(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Resource Key
// ============================================================================

/// Stable identifier of one watched object: `{kind}:{namespace}:{name}`
///
/// Cluster-scoped objects have an empty namespace (`node::worker-1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    kind: String,
    namespace: String,
    name: String,
}

impl ResourceKey {
    /// Derive the key for an object of `kind`
    pub fn new(kind: &ResourceKind, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Parse a rendered key back into its parts
    pub fn parse(raw: &str) -> Result<Self, MonitorError> {
        let mut parts = raw.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(namespace), Some(name))
                if !kind.is_empty() && !name.is_empty() && !name.contains(':') =>
            {
                Ok(Self {
                    kind: kind.to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(MonitorError::InvalidKey(raw.to_string())),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Namespace segment, empty for cluster-scoped objects
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.namespace, self.name)
    }
}

impl std::str::FromStr for ResourceKey {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ============================================================================
// Tests
// ============================================================================
