//! Cluster watch feeding a resource monitor

use std::fmt::Debug;
use std::pin::pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::manager::Runnable;

use super::controller::ResourceMonitorController;
use super::event::ResourceEvent;

/// Watches every object of kind `K` and reconciles each change
pub struct ResourceWatch<K> {
    api: Api<K>,
    controller: Arc<ResourceMonitorController>,
    config: watcher::Config,
}

impl<K> ResourceWatch<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    pub fn new(api: Api<K>, controller: Arc<ResourceMonitorController>) -> Self {
        Self {
            api,
            controller,
            config: watcher::Config::default(),
        }
    }

    /// Watch `K` across all namespaces
    pub fn all(client: Client, controller: Arc<ResourceMonitorController>) -> Self
    where
        K::DynamicType: Default,
    {
        Self::new(Api::all(client), controller)
    }

    pub fn with_config(mut self, config: watcher::Config) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl<K> Runnable for ResourceWatch<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    fn name(&self) -> String {
        format!("watch/{}", self.controller.kind())
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) -> crate::Result<()> {
        let mut stream = pin!(watcher(self.api.clone(), self.config.clone()).default_backoff());
        tracing::info!(kind = %self.controller.kind(), "Watching resources");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        if let Some(event) = ResourceEvent::from_watch_event(&event) {
                            self.controller.reconcile(&event);
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(
                            kind = %self.controller.kind(),
                            error = %e,
                            "Watch error, backing off"
                        );
                    }
                    None => break,
                }
            }
        }

        tracing::debug!(kind = %self.controller.kind(), "Watch stopped");
        Ok(())
    }
}
