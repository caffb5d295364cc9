//! Keeps the scan-API store in sync with scan-API Services in the cluster

use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ScanApiConfig;
use crate::manager::Runnable;

use super::store::{ScanApiStore, ScanTarget};

/// Watches labelled Services and registers them as scan targets
pub struct ScanApiWatcher {
    api: Api<Service>,
    store: Arc<ScanApiStore>,
    config: ScanApiConfig,
    token: Option<String>,
}

impl ScanApiWatcher {
    pub fn new(
        client: Client,
        store: Arc<ScanApiStore>,
        config: ScanApiConfig,
        token: Option<String>,
    ) -> Self {
        Self {
            api: Api::all(client),
            store,
            config,
            token,
        }
    }
}

/// Applies Service watch events to the scan-API store
pub struct ScanApiSync {
    store: Arc<ScanApiStore>,
    config: ScanApiConfig,
    token: Option<String>,

    // Namespaces seen during the current (re)list
    listing: Option<HashSet<String>>,
}

impl ScanApiSync {
    pub fn new(store: Arc<ScanApiStore>, config: ScanApiConfig, token: Option<String>) -> Self {
        Self {
            store,
            config,
            token,
            listing: None,
        }
    }

    pub async fn handle(&mut self, event: watcher::Event<Service>) {
        match event {
            watcher::Event::Init => self.listing = Some(HashSet::new()),
            watcher::Event::InitApply(svc) => self.apply(&svc).await,
            watcher::Event::InitDone => {
                if let Some(seen) = self.listing.take() {
                    let dropped = self.store.retain_namespaces(&seen).await;
                    if dropped > 0 {
                        tracing::info!(dropped = dropped, "Dropped stale scan targets after relist");
                    }
                }
            }
            watcher::Event::Apply(svc) => self.apply(&svc).await,
            watcher::Event::Delete(svc) => self.delete(&svc).await,
        }
    }

    /// Namespaces and endpoint a Service registers under
    ///
    /// Returns `None` for Services without a usable port.
    fn registrations(&self, svc: &Service) -> Option<(Vec<String>, Url)> {
        let namespace = svc.namespace()?;
        let endpoint = service_endpoint(svc, self.config.port)?;

        let mut namespaces = vec![namespace.clone()];
        if self.config.cluster_scope_namespace.as_deref() == Some(namespace.as_str()) {
            namespaces.push(String::new());
        }
        Some((namespaces, endpoint))
    }

    async fn apply(&mut self, svc: &Service) {
        let Some((namespaces, endpoint)) = self.registrations(svc) else {
            tracing::debug!(service = %svc.name_any(), "Scan-API Service has no usable port, ignoring");
            return;
        };

        for namespace in &namespaces {
            let mut target = ScanTarget::new(endpoint.clone());
            if let Some(token) = &self.token {
                target = target.with_token(token.clone());
            }
            self.store.upsert(namespace.clone(), target).await;
        }

        if let Some(seen) = self.listing.as_mut() {
            seen.extend(namespaces);
        }
    }

    async fn delete(&self, svc: &Service) {
        let Some((namespaces, endpoint)) = self.registrations(svc) else {
            return;
        };

        for namespace in &namespaces {
            self.store.remove_endpoint(namespace, &endpoint).await;
        }
    }
}

/// In-cluster URL of a Service: `http://{name}.{namespace}.svc:{port}`
pub fn service_endpoint(svc: &Service, port_override: Option<u16>) -> Option<Url> {
    let namespace = svc.namespace()?;
    let name = svc.metadata.name.as_deref()?;

    let port = match port_override {
        Some(port) => i32::from(port),
        None => svc
            .spec
            .as_ref()?
            .ports
            .as_ref()?
            .first()
            .map(|p| p.port)?,
    };

    Url::parse(&format!("http://{name}.{namespace}.svc:{port}")).ok()
}

#[async_trait]
impl Runnable for ScanApiWatcher {
    fn name(&self) -> String {
        "scan-api-watcher".to_string()
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) -> crate::Result<()> {
        let config = watcher::Config::default().labels(&self.config.label_selector);
        let mut stream = pin!(watcher(self.api.clone(), config).default_backoff());

        tracing::info!(selector = %self.config.label_selector, "Watching scan-API Services");

        let mut sync = ScanApiSync::new(
            self.store.clone(),
            self.config.clone(),
            self.token.clone(),
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(event)) => sync.handle(event).await,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Scan-API watch error, backing off");
                    }
                    None => break,
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use kube::api::ObjectMeta;

    fn service(ns: &str, name: &str, ports: &[i32]) -> Service {
        Service {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(
                    ports
                        .iter()
                        .map(|p| ServicePort {
                            port: *p,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn scan_config(cluster_scope: Option<&str>) -> ScanApiConfig {
        ScanApiConfig {
            cluster_scope_namespace: cluster_scope.map(str::to_string),
            ..Default::default()
        }
    }

    fn sync(cluster_scope: Option<&str>) -> (ScanApiSync, Arc<ScanApiStore>) {
        let store = Arc::new(ScanApiStore::new());
        let sync = ScanApiSync::new(store.clone(), scan_config(cluster_scope), None);
        (sync, store)
    }

    async fn endpoint_of(store: &ScanApiStore, ns: &str) -> Option<String> {
        store.lookup(ns).await.map(|t| t.endpoint.to_string())
    }

    #[tokio::test]
    async fn test_apply_registers_namespace_with_token() {
        let store = Arc::new(ScanApiStore::new());
        let mut sync = ScanApiSync::new(store.clone(), scan_config(None), Some("tok".to_string()));

        sync.handle(watcher::Event::Apply(service("ns-a", "scan-api", &[8080])))
            .await;

        let target = store.lookup("ns-a").await.unwrap();
        assert_eq!(target.endpoint.as_str(), "http://scan-api.ns-a.svc:8080/");
        assert_eq!(target.token.as_deref(), Some("tok"));
        assert!(store.lookup("").await.is_none());
    }

    #[tokio::test]
    async fn test_cluster_scope_namespace_also_registers_empty_namespace() {
        let (mut sync, store) = sync(Some("scan-system"));

        sync.handle(watcher::Event::Apply(service("scan-system", "scan-api", &[8080])))
            .await;

        assert_eq!(store.namespaces().await, vec!["", "scan-system"]);
        assert_eq!(
            endpoint_of(&store, "").await.as_deref(),
            Some("http://scan-api.scan-system.svc:8080/")
        );

        sync.handle(watcher::Event::Delete(service("scan-system", "scan-api", &[8080])))
            .await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_only_removes_matching_endpoint() {
        let (mut sync, store) = sync(None);

        sync.handle(watcher::Event::Apply(service("ns-a", "scan-api", &[8080])))
            .await;
        sync.handle(watcher::Event::Apply(service("ns-a", "scan-api-v2", &[8080])))
            .await;

        // The old Service no longer owns the namespace
        sync.handle(watcher::Event::Delete(service("ns-a", "scan-api", &[8080])))
            .await;
        assert_eq!(
            endpoint_of(&store, "ns-a").await.as_deref(),
            Some("http://scan-api-v2.ns-a.svc:8080/")
        );

        sync.handle(watcher::Event::Delete(service("ns-a", "scan-api-v2", &[8080])))
            .await;
        assert!(store.lookup("ns-a").await.is_none());
    }

    #[tokio::test]
    async fn test_relist_drops_vanished_namespaces() {
        let (mut sync, store) = sync(Some("scan-system"));

        for ns in ["ns-a", "ns-old", "scan-system"] {
            sync.handle(watcher::Event::Apply(service(ns, "scan-api", &[8080])))
                .await;
        }
        assert_eq!(store.len().await, 4);

        sync.handle(watcher::Event::Init).await;
        sync.handle(watcher::Event::InitApply(service("ns-a", "scan-api", &[8080])))
            .await;
        sync.handle(watcher::Event::InitApply(service("scan-system", "scan-api", &[8080])))
            .await;

        // Nothing is dropped until the relist completes
        assert_eq!(store.len().await, 4);

        sync.handle(watcher::Event::InitDone).await;
        assert_eq!(store.namespaces().await, vec!["", "ns-a", "scan-system"]);
    }

    #[tokio::test]
    async fn test_service_without_port_is_ignored() {
        let (mut sync, store) = sync(None);

        sync.handle(watcher::Event::Apply(service("ns-a", "scan-api", &[])))
            .await;

        assert!(store.is_empty().await);
    }

    #[test]
    fn test_service_endpoint_uses_first_port() {
        let svc = service("ns-a", "scan-api", &[8080, 9090]);
        let url = service_endpoint(&svc, None).unwrap();
        assert_eq!(url.as_str(), "http://scan-api.ns-a.svc:8080/");
    }

    #[test]
    fn test_service_endpoint_port_override() {
        let svc = service("ns-a", "scan-api", &[8080]);
        let url = service_endpoint(&svc, Some(443)).unwrap();
        assert_eq!(url.port(), Some(443));
    }

    #[test]
    fn test_service_endpoint_without_ports() {
        let svc = service("ns-a", "scan-api", &[]);
        assert!(service_endpoint(&svc, None).is_none());
    }
}
