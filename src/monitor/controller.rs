//! Per-kind adapter between the cluster watch and the debouncer

use std::sync::Arc;

use async_trait::async_trait;
use kube::Resource;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::debouncer::{Debouncer, DebouncerError};
use crate::error::{Error, Result};
use crate::manager::Runnable;

use super::event::{CreateUpdateEvents, EventFilter, ResourceEvent};
use super::identity::{ClusterIdentity, ManagedBy, DEFAULT_MANAGED_BY_PREFIX};
use super::key::{ResourceKey, ResourceKind};
use super::MonitorError;

/// Derives the debouncer key for an event of a given kind
pub type KeyFn = fn(&ResourceKind, &ResourceEvent) -> ResourceKey;

/// Default key derivation: `{kind}:{namespace}:{name}`
pub fn default_key(kind: &ResourceKind, event: &ResourceEvent) -> ResourceKey {
    ResourceKey::new(kind, &event.namespace, &event.name)
}

/// Result of handling one change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Key forwarded to the debouncer
    Queued(ResourceKey),

    /// Key forwarded but already pending
    Coalesced(ResourceKey),

    /// Event dropped by the filter
    Filtered,
}

/// Bridges one watched resource kind into the shared debouncer
pub struct ResourceMonitorController {
    kind: ResourceKind,
    identity: Arc<dyn ClusterIdentity>,
    debouncer: Arc<Debouncer>,
    filter: Box<dyn EventFilter>,
    key_fn: KeyFn,
    managed_by_prefix: String,
}

impl ResourceMonitorController {
    /// Create a controller for a resource type
    ///
    /// Fails if the kind cannot be identified; callers should treat that as
    /// a fatal startup error.
    pub fn new<K: Resource>(
        dt: &K::DynamicType,
        identity: Arc<dyn ClusterIdentity>,
        debouncer: Arc<Debouncer>,
    ) -> std::result::Result<Self, MonitorError> {
        let kind = ResourceKind::of::<K>(dt)?;
        Ok(Self::for_kind(kind, identity, debouncer))
    }

    /// Create a controller for an already resolved kind
    pub fn for_kind(
        kind: ResourceKind,
        identity: Arc<dyn ClusterIdentity>,
        debouncer: Arc<Debouncer>,
    ) -> Self {
        Self {
            kind,
            identity,
            debouncer,
            filter: Box::new(CreateUpdateEvents),
            key_fn: default_key,
            managed_by_prefix: DEFAULT_MANAGED_BY_PREFIX.to_string(),
        }
    }

    pub fn with_filter(mut self, filter: impl EventFilter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = key_fn;
        self
    }

    pub fn with_managed_by_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.managed_by_prefix = prefix.into();
        self
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// Resolve the cluster identity and start the debouncer
    ///
    /// A missing cluster UID degrades to an empty tag. Only an unreachable
    /// cluster API or an invalid debouncer configuration is an error.
    /// Returns the drain loop handle when this call started the debouncer,
    /// `None` when another controller sharing it already had.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<Option<JoinHandle<()>>> {
        let uid = self.identity.cluster_uid().await?;
        let managed_by = ManagedBy::from_cluster_uid(&self.managed_by_prefix, uid.as_deref());

        match self.debouncer.start(shutdown, managed_by) {
            Ok(handle) => {
                if uid.is_none() {
                    tracing::info!("No cluster UID available, scans will not carry a ManagedBy tag");
                }
                tracing::info!(kind = %self.kind, "Resource monitor started debouncer");
                Ok(Some(handle))
            }
            Err(DebouncerError::AlreadyStarted(state)) => {
                tracing::debug!(
                    kind = %self.kind,
                    state = %state,
                    "Debouncer already started by another monitor"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Forward a change notification to the debouncer
    ///
    /// Never blocks and never fails.
    pub fn reconcile(&self, event: &ResourceEvent) -> ReconcileOutcome {
        if !self.filter.accepts(event) {
            return ReconcileOutcome::Filtered;
        }

        let key = (self.key_fn)(&self.kind, event);
        tracing::trace!(key = %key, change = ?event.change, "Resource changed");

        if self.debouncer.add(key.clone()) {
            ReconcileOutcome::Queued(key)
        } else {
            ReconcileOutcome::Coalesced(key)
        }
    }
}

#[async_trait]
impl Runnable for ResourceMonitorController {
    fn name(&self) -> String {
        format!("resource-monitor/{}", self.kind)
    }

    /// The controller that starts the debouncer lives as long as its drain loop
    async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let Some(handle) = self.start(shutdown).await? else {
            return Ok(());
        };

        handle.await.map_err(|e| {
            Error::with_source(format!("Debouncer drain loop started by {} failed", self.kind), e)
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DebouncerConfig;
    use crate::debouncer::{DebouncerState, HttpScanDispatcher};
    use crate::monitor::event::ChangeKind;
    use crate::monitor::identity::{CachedClusterIdentity, StaticClusterIdentity};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use crate::scan_api::ScanApiStore;
    use k8s_openapi::api::core::v1::Pod;
    use kube::api::{ApiResource, DynamicObject, GroupVersionKind};

    struct UnreachableIdentity;

    #[async_trait]
    impl ClusterIdentity for UnreachableIdentity {
        async fn cluster_uid(&self) -> std::result::Result<Option<String>, MonitorError> {
            Err(MonitorError::ClusterUnreachable("connection refused".to_string()))
        }
    }

    #[derive(Default)]
    struct CountingIdentity {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ClusterIdentity for CountingIdentity {
        async fn cluster_uid(&self) -> std::result::Result<Option<String>, MonitorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn debouncer() -> Arc<Debouncer> {
        Arc::new(Debouncer::new(
            Arc::new(ScanApiStore::new()),
            Arc::new(HttpScanDispatcher::new().unwrap()),
            DebouncerConfig::default(),
        ))
    }

    fn pod_controller(debouncer: Arc<Debouncer>) -> ResourceMonitorController {
        ResourceMonitorController::new::<Pod>(
            &(),
            Arc::new(StaticClusterIdentity(Some("uid".to_string()))),
            debouncer,
        )
        .unwrap()
    }

    #[test]
    fn test_new_resolves_kind() {
        let controller = pod_controller(debouncer());
        assert_eq!(controller.kind().as_str(), "pod");
        assert_eq!(controller.name(), "resource-monitor/pod");
    }

    #[test]
    fn test_new_fails_for_unidentified_kind() {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("example.com", "v1", ""));
        let result = ResourceMonitorController::new::<DynamicObject>(
            &ar,
            Arc::new(StaticClusterIdentity::default()),
            debouncer(),
        );
        assert!(matches!(result, Err(MonitorError::UnknownKind(_))));
    }

    #[test]
    fn test_reconcile_queues_and_coalesces() {
        let debouncer = debouncer();
        let controller = pod_controller(debouncer.clone());
        let event = ResourceEvent::new("ns-a", "x", ChangeKind::Update);

        let first = controller.reconcile(&event);
        let second = controller.reconcile(&event);

        let expected = ResourceKey::parse("pod:ns-a:x").unwrap();
        assert_eq!(first, ReconcileOutcome::Queued(expected.clone()));
        assert_eq!(second, ReconcileOutcome::Coalesced(expected));
        assert_eq!(debouncer.pending_len(), 1);
    }

    #[test]
    fn test_reconcile_ignores_deletes() {
        let debouncer = debouncer();
        let controller = pod_controller(debouncer.clone());

        let outcome = controller.reconcile(&ResourceEvent::new("ns-a", "x", ChangeKind::Delete));

        assert_eq!(outcome, ReconcileOutcome::Filtered);
        assert_eq!(debouncer.pending_len(), 0);
    }

    #[test]
    fn test_custom_key_fn() {
        fn by_namespace(kind: &ResourceKind, event: &ResourceEvent) -> ResourceKey {
            ResourceKey::new(kind, &event.namespace, "all")
        }

        let debouncer = debouncer();
        let controller = pod_controller(debouncer.clone()).with_key_fn(by_namespace);

        controller.reconcile(&ResourceEvent::new("ns-a", "x", ChangeKind::Create));
        controller.reconcile(&ResourceEvent::new("ns-a", "y", ChangeKind::Create));

        assert_eq!(debouncer.pending_len(), 1);
        assert!(debouncer.is_pending(&ResourceKey::parse("pod:ns-a:all").unwrap()));
    }

    #[tokio::test]
    async fn test_start_without_uid_still_starts() {
        let debouncer = debouncer();
        let controller = ResourceMonitorController::new::<Pod>(
            &(),
            Arc::new(StaticClusterIdentity(None)),
            debouncer.clone(),
        )
        .unwrap();

        let token = CancellationToken::new();
        controller.start(token.clone()).await.unwrap();
        assert_eq!(debouncer.state(), DebouncerState::Running);
        token.cancel();
    }

    #[tokio::test]
    async fn test_start_fails_when_cluster_unreachable() {
        let debouncer = debouncer();
        let controller = ResourceMonitorController::new::<Pod>(
            &(),
            Arc::new(UnreachableIdentity),
            debouncer.clone(),
        )
        .unwrap();

        let result = controller.start(CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(Error::Monitor(MonitorError::ClusterUnreachable(_)))
        ));
        assert_eq!(debouncer.state(), DebouncerState::Uninitialized);
    }

    #[tokio::test]
    async fn test_start_fails_on_invalid_debouncer_config() {
        let debouncer = Arc::new(Debouncer::new(
            Arc::new(ScanApiStore::new()),
            Arc::new(HttpScanDispatcher::new().unwrap()),
            DebouncerConfig {
                tick_interval_ms: 0,
                ..Default::default()
            },
        ));
        let controller = pod_controller(debouncer.clone());

        let result = controller.start(CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(Error::Debouncer(DebouncerError::InvalidConfig(_)))
        ));
        assert_eq!(debouncer.state(), DebouncerState::Uninitialized);
    }

    #[tokio::test]
    async fn test_shared_debouncer_started_once() {
        let debouncer = debouncer();
        let pods = pod_controller(debouncer.clone());
        let nodes = ResourceMonitorController::for_kind(
            ResourceKind::new("node").unwrap(),
            Arc::new(StaticClusterIdentity(Some("uid".to_string()))),
            debouncer.clone(),
        );

        let token = CancellationToken::new();
        let first = pods.start(token.clone()).await.unwrap();
        let second = nodes.start(token.clone()).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(debouncer.state(), DebouncerState::Running);
        token.cancel();
    }

    #[tokio::test]
    async fn test_run_lasts_as_long_as_drain_loop() {
        let debouncer = debouncer();
        let owner = Arc::new(pod_controller(debouncer.clone()));
        let follower = Arc::new(ResourceMonitorController::for_kind(
            ResourceKind::new("node").unwrap(),
            Arc::new(StaticClusterIdentity(None)),
            debouncer.clone(),
        ));

        let token = CancellationToken::new();
        let owner_run = tokio::spawn(owner.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A controller that finds the debouncer running returns at once
        follower.run(token.clone()).await.unwrap();
        assert!(!owner_run.is_finished());

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), owner_run)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(debouncer.state(), DebouncerState::Stopped);
    }

    #[tokio::test]
    async fn test_cached_identity_resolved_once_for_all_controllers() {
        let inner = CountingIdentity::default();
        let calls = inner.calls.clone();
        let identity: Arc<dyn ClusterIdentity> = Arc::new(CachedClusterIdentity::new(inner));
        let debouncer = debouncer();

        let token = CancellationToken::new();
        for kind in ["pod", "node", "job"] {
            let controller = ResourceMonitorController::for_kind(
                ResourceKind::new(kind).unwrap(),
                identity.clone(),
                debouncer.clone(),
            );
            controller.start(token.clone()).await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        token.cancel();
    }
}
