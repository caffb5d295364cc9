//! Common test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use scanwatch::config::DebouncerConfig;
use scanwatch::debouncer::{Debouncer, DispatchError, ScanDispatcher, ScanRequest};
use scanwatch::monitor::{ResourceKey, ResourceKind};
use scanwatch::scan_api::{ScanApiStore, ScanTarget};

/// Records every request it is asked to send
#[derive(Default)]
pub struct RecordingDispatcher {
    requests: Mutex<Vec<(Url, ScanRequest)>>,
}

impl RecordingDispatcher {
    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn count_for(&self, key: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|(_, r)| r.resource_key == key)
            .count()
    }

    /// Dispatched keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .requests
            .lock()
            .iter()
            .map(|(_, r)| r.resource_key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn requests(&self) -> Vec<(Url, ScanRequest)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ScanDispatcher for RecordingDispatcher {
    async fn dispatch(&self, target: &ScanTarget, request: &ScanRequest) -> Result<(), DispatchError> {
        self.requests
            .lock()
            .push((target.endpoint.clone(), request.clone()));
        Ok(())
    }
}

/// Panics on resources with a given name, records the rest
pub struct PanickingDispatcher {
    pub poison: String,
    pub inner: RecordingDispatcher,
}

impl PanickingDispatcher {
    pub fn new(poison: &str) -> Self {
        Self {
            poison: poison.to_string(),
            inner: RecordingDispatcher::default(),
        }
    }
}

#[async_trait]
impl ScanDispatcher for PanickingDispatcher {
    async fn dispatch(&self, target: &ScanTarget, request: &ScanRequest) -> Result<(), DispatchError> {
        if request.name == self.poison {
            panic!("dispatch of {} blew up", request.resource_key);
        }
        self.inner.dispatch(target, request).await
    }
}

/// Fails every dispatch with a 503
#[derive(Default)]
pub struct FailingDispatcher {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ScanDispatcher for FailingDispatcher {
    async fn dispatch(&self, _: &ScanTarget, _: &ScanRequest) -> Result<(), DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DispatchError::Http {
            status: 503,
            message: "unavailable".to_string(),
        })
    }
}

/// Takes `delay` per dispatch, recording when it starts
pub struct SlowDispatcher {
    pub delay: Duration,
    pub inner: RecordingDispatcher,
}

#[async_trait]
impl ScanDispatcher for SlowDispatcher {
    async fn dispatch(&self, target: &ScanTarget, request: &ScanRequest) -> Result<(), DispatchError> {
        self.inner.dispatch(target, request).await?;
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

pub fn key(kind: &str, namespace: &str, name: &str) -> ResourceKey {
    ResourceKey::new(&ResourceKind::new(kind).unwrap(), namespace, name)
}

pub fn pod(namespace: &str, name: &str) -> ResourceKey {
    key("pod", namespace, name)
}

pub fn endpoint_for(namespace: &str) -> Url {
    let host = if namespace.is_empty() { "cluster" } else { namespace };
    Url::parse(&format!("http://scan-api.{host}.svc:8080")).unwrap()
}

/// Store with one target per namespace
pub async fn store_with(namespaces: &[&str]) -> Arc<ScanApiStore> {
    let store = Arc::new(ScanApiStore::new());
    for ns in namespaces {
        store.upsert(*ns, ScanTarget::new(endpoint_for(ns))).await;
    }
    store
}

pub fn debouncer(
    store: Arc<ScanApiStore>,
    dispatcher: Arc<dyn ScanDispatcher>,
    tick: Duration,
) -> Arc<Debouncer> {
    let config = DebouncerConfig::default().with_tick_interval(tick);
    Arc::new(Debouncer::new(store, dispatcher, config))
}
