//! Lifetime management for long-running tasks
//!
//! Every watch stream, resource monitor and server is a [`Runnable`]. The
//! [`Manager`] runs them together under one cancellation token and tears
//! everything down on a shutdown signal or on the first fatal error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A task whose lifetime is bound to the manager
#[async_trait]
pub trait Runnable: Send + Sync + 'static {
    fn name(&self) -> String;

    /// Run until `shutdown` is cancelled
    ///
    /// Returning `Ok` early is allowed (e.g. one-shot start hooks); returning
    /// `Err` stops the whole manager.
    async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Runs registered [`Runnable`]s until shutdown
pub struct Manager {
    runnables: Vec<Arc<dyn Runnable>>,
    shutdown: CancellationToken,
    grace_period: Duration,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        Self {
            runnables: Vec::new(),
            shutdown: CancellationToken::new(),
            grace_period: Duration::from_secs(10),
        }
    }

    /// Set how long to wait for tasks after shutdown before aborting them
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn add(&mut self, runnable: Arc<dyn Runnable>) {
        self.runnables.push(runnable);
    }

    pub fn len(&self) -> usize {
        self.runnables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runnables.is_empty()
    }

    /// Token cancelled when the manager shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run everything until `signal` resolves or a runnable fails
    pub async fn run(self, signal: impl Future<Output = ()> + Send) -> Result<()> {
        let mut tasks = JoinSet::new();

        for runnable in self.runnables {
            let name = runnable.name();
            let token = self.shutdown.child_token();
            tracing::debug!(runnable = %name, "Starting runnable");
            tasks.spawn(async move { (name, runnable.run(token).await) });
        }

        tracing::info!(runnables = tasks.len(), "Manager started");

        let mut first_error: Option<Error> = None;
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                _ = self.shutdown.cancelled() => break,
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((name, Ok(())))) => {
                        tracing::debug!(runnable = %name, "Runnable finished");
                    }
                    Some(Ok((name, Err(e)))) => {
                        tracing::error!(runnable = %name, error = %e, "Runnable failed");
                        first_error = Some(e);
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Runnable task aborted");
                        first_error = Some(Error::with_source("Runnable task aborted", e));
                        break;
                    }
                }
            }
        }

        self.shutdown.cancel();

        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                if let Ok((name, Err(e))) = joined {
                    tracing::warn!(runnable = %name, error = %e, "Runnable failed during shutdown");
                }
            }
        };

        if tokio::time::timeout(self.grace_period, drain).await.is_err() {
            tracing::warn!("Grace period elapsed, aborting remaining tasks");
            tasks.abort_all();
        }

        tracing::info!("Manager stopped");
        first_error.map_or(Ok(()), Err)
    }
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct UntilCancelled {
        stopped: AtomicBool,
    }

    #[async_trait]
    impl Runnable for UntilCancelled {
        fn name(&self) -> String {
            "until-cancelled".to_string()
        }

        async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
            shutdown.cancelled().await;
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct OneShot;

    #[async_trait]
    impl Runnable for OneShot {
        fn name(&self) -> String {
            "one-shot".to_string()
        }

        async fn run(self: Arc<Self>, _shutdown: CancellationToken) -> Result<()> {
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Runnable for Failing {
        fn name(&self) -> String {
            "failing".to_string()
        }

        async fn run(self: Arc<Self>, _shutdown: CancellationToken) -> Result<()> {
            Err(Error::other("boom"))
        }
    }

    #[tokio::test]
    async fn test_signal_stops_all_runnables() {
        let long = Arc::new(UntilCancelled {
            stopped: AtomicBool::new(false),
        });

        let mut manager = Manager::new();
        manager.add(long.clone());
        manager.add(Arc::new(OneShot));
        assert_eq!(manager.len(), 2);

        let result = manager
            .run(tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert!(result.is_ok());
        assert!(long.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failure_stops_manager() {
        let long = Arc::new(UntilCancelled {
            stopped: AtomicBool::new(false),
        });

        let mut manager = Manager::new();
        manager.add(long.clone());
        manager.add(Arc::new(Failing));

        let result = manager.run(std::future::pending()).await;

        assert!(result.is_err());
        assert!(long.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_external_cancel() {
        let manager = Manager::new();
        let token = manager.shutdown_token();
        token.cancel();

        assert!(manager.run(std::future::pending()).await.is_ok());
    }
}
