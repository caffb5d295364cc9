//! Resource monitoring: from cluster watch events to debouncer keys
//!
//! One [`ResourceMonitorController`] exists per watched kind. Each one is
//! registered twice with the [`Manager`]: once as its watch stream, once as
//! the background task that resolves the cluster identity and starts the
//! shared debouncer.
//!
//! ```text
//! watch event ──▶ ResourceWatch<K> ──▶ controller.reconcile() ──▶ debouncer.add(key)
//! ```

pub mod controller;
pub mod event;
pub mod identity;
pub mod key;
pub mod watch;

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{Client, Resource};

use crate::debouncer::Debouncer;
use crate::manager::Manager;

pub use controller::{ReconcileOutcome, ResourceMonitorController};
pub use event::{ChangeKind, CreateUpdateEvents, EventFilter, ResourceEvent};
pub use identity::{CachedClusterIdentity, ClusterIdentity, KubeClusterIdentity, ManagedBy};
pub use key::{ResourceKey, ResourceKind};
pub use watch::ResourceWatch;

/// Resource monitor errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum MonitorError {
    /// Resource kind cannot be identified
    #[error("Unknown resource kind: {0}")]
    UnknownKind(String),

    /// Rendered key does not have the `kind:namespace:name` shape
    #[error("Invalid resource key: {0}")]
    InvalidKey(String),

    /// Cluster API could not be reached
    #[error("Cluster API unreachable: {0}")]
    ClusterUnreachable(String),
}

/// Shared inputs for registering monitors
///
/// `identity` is shared by every controller; wrap it in a
/// [`CachedClusterIdentity`] so the cluster is asked only once.
#[derive(Clone)]
pub struct MonitorContext {
    pub client: Client,
    pub identity: Arc<dyn ClusterIdentity>,
    pub debouncer: Arc<Debouncer>,
    pub managed_by_prefix: String,
}

/// Register the watch and monitor for a configured kind name
///
/// Unknown kinds are rejected so startup aborts before anything runs.
pub fn register_kind(
    manager: &mut Manager,
    ctx: &MonitorContext,
    kind_name: &str,
) -> Result<ResourceKind, MonitorError> {
    let kind = ResourceKind::from_config(kind_name)?;

    match kind.as_str() {
        "pod" => register::<Pod>(manager, ctx),
        "deployment" => register::<Deployment>(manager, ctx),
        "daemonset" => register::<DaemonSet>(manager, ctx),
        "statefulset" => register::<StatefulSet>(manager, ctx),
        "replicaset" => register::<ReplicaSet>(manager, ctx),
        "job" => register::<Job>(manager, ctx),
        "cronjob" => register::<CronJob>(manager, ctx),
        "node" => register::<Node>(manager, ctx),
        _ => Err(MonitorError::UnknownKind(kind_name.to_string())),
    }
}

fn register<K>(manager: &mut Manager, ctx: &MonitorContext) -> Result<ResourceKind, MonitorError>
where
    K: Resource<DynamicType = ()>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug
        + Send
        + Sync
        + 'static,
{
    let controller = Arc::new(
        ResourceMonitorController::new::<K>(&(), ctx.identity.clone(), ctx.debouncer.clone())?
            .with_managed_by_prefix(ctx.managed_by_prefix.clone()),
    );
    let kind = controller.kind().clone();

    manager.add(controller.clone());
    manager.add(Arc::new(ResourceWatch::<K>::all(ctx.client.clone(), controller)));

    tracing::debug!(kind = %kind, "Registered resource monitor");
    Ok(kind)
}
