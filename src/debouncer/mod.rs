//! Change-event debouncer
//!
//! Converts a bursty stream of [`Debouncer::add`] calls into one scan trigger
//! per key per tick interval.
//!
//! # Lifecycle
//!
//! ```text
//!  Uninitialized ──start()──▶ Running ──cancel──▶ Stopped
//!        │                       │
//!   add() buffers           add() queues         add() ignored
//! ```
//!
//! Keys added before `start` are kept and flushed on the first tick after it.
//! Cancelling the token discards whatever is still pending: dispatch is
//! at-most-once, and a missed key is re-added by the next watch event for
//! the same object.
//!
//! # Drain
//!
//! Each tick swaps the pending set for an empty one under the lock, then
//! resolves targets and dispatches with the lock released. A key added while
//! a drain is running lands in the fresh set and goes out on the next tick.

pub mod dispatch;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, DebouncerConfig};
use crate::metrics::{self, DispatchOutcome};
use crate::monitor::identity::ManagedBy;
use crate::monitor::key::ResourceKey;
use crate::scan_api::ScanApiStore;

pub use dispatch::{DispatchError, HttpScanDispatcher, ScanDispatcher, ScanRequest};

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of the debouncer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebouncerState {
    Uninitialized,
    Running,
    Stopped,
}

impl fmt::Display for DebouncerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

struct Pending {
    state: DebouncerState,
    keys: HashSet<ResourceKey>,
}

/// Counts from a single drain cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub drained: usize,
    pub dispatched: usize,
    pub failed: usize,
    pub no_target: usize,
    pub panicked: usize,
}

impl DrainReport {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Success => self.dispatched += 1,
            DispatchOutcome::Failure => self.failed += 1,
            DispatchOutcome::NoTarget => self.no_target += 1,
            DispatchOutcome::Panic => self.panicked += 1,
        }
    }
}

// ============================================================================
// Debouncer
// ============================================================================

/// Coalesces resource keys and dispatches one scan per key per tick
pub struct Debouncer {
    pending: Mutex<Pending>,
    store: Arc<ScanApiStore>,
    dispatcher: Arc<dyn ScanDispatcher>,
    config: DebouncerConfig,
}

impl Debouncer {
    pub fn new(
        store: Arc<ScanApiStore>,
        dispatcher: Arc<dyn ScanDispatcher>,
        config: DebouncerConfig,
    ) -> Self {
        Self {
            pending: Mutex::new(Pending {
                state: DebouncerState::Uninitialized,
                keys: HashSet::new(),
            }),
            store,
            dispatcher,
            config,
        }
    }

    /// Queue a key for the next drain
    ///
    /// Returns `true` if the key was not already pending. Never blocks on a
    /// running drain; once stopped, keys are ignored.
    pub fn add(&self, key: ResourceKey) -> bool {
        let mut pending = self.pending.lock();
        if pending.state == DebouncerState::Stopped {
            return false;
        }

        metrics::record_key_added(key.kind());
        let inserted = pending.keys.insert(key);
        metrics::set_pending_keys(pending.keys.len());
        inserted
    }

    pub fn state(&self) -> DebouncerState {
        self.pending.lock().state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().keys.len()
    }

    pub fn is_pending(&self, key: &ResourceKey) -> bool {
        self.pending.lock().keys.contains(key)
    }

    pub fn config(&self) -> &DebouncerConfig {
        &self.config
    }

    /// Start the background drain loop
    ///
    /// Only the first call succeeds. The loop runs until `shutdown` is
    /// cancelled and stamps every dispatch with `managed_by`. An invalid
    /// configuration is rejected and leaves the debouncer uninitialized.
    pub fn start(
        self: &Arc<Self>,
        shutdown: CancellationToken,
        managed_by: ManagedBy,
    ) -> Result<JoinHandle<()>, DebouncerError> {
        self.config
            .validate()
            .map_err(DebouncerError::InvalidConfig)?;

        {
            let mut pending = self.pending.lock();
            if pending.state != DebouncerState::Uninitialized {
                return Err(DebouncerError::AlreadyStarted(pending.state));
            }
            pending.state = DebouncerState::Running;
        }

        tracing::info!(
            tick_interval_ms = self.config.tick_interval_ms,
            managed_by = %managed_by,
            "Starting debouncer"
        );

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            this.run(shutdown, managed_by).await;
        }))
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken, managed_by: ManagedBy) {
        let tick = self.config.tick_interval();
        let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        report = self.flush(&managed_by) => {
                            if report.drained > 0 {
                                tracing::debug!(
                                    drained = report.drained,
                                    dispatched = report.dispatched,
                                    failed = report.failed,
                                    no_target = report.no_target,
                                    panicked = report.panicked,
                                    "Drain cycle complete"
                                );
                            }
                        }
                    }
                }
            }
        }

        self.stop();
    }

    fn stop(&self) {
        let mut pending = self.pending.lock();
        pending.state = DebouncerState::Stopped;
        let discarded = pending.keys.len();
        pending.keys.clear();
        metrics::set_pending_keys(0);

        tracing::info!(discarded = discarded, "Debouncer stopped");
    }

    /// Swap the pending set for an empty one and return the old contents
    fn take_pending(&self) -> Vec<ResourceKey> {
        let mut pending = self.pending.lock();
        let keys = std::mem::take(&mut pending.keys);
        metrics::set_pending_keys(0);
        keys.into_iter().collect()
    }

    /// Drain the pending set and dispatch every key once
    ///
    /// Each dispatch runs in its own task, so a panic in one does not stop
    /// the others.
    pub async fn flush(&self, managed_by: &ManagedBy) -> DrainReport {
        let keys = self.take_pending();
        let mut report = DrainReport {
            drained: keys.len(),
            ..Default::default()
        };
        metrics::record_drain(keys.len());

        if keys.is_empty() {
            return report;
        }

        let outcomes = stream::iter(keys)
            .map(|key| {
                let store = Arc::clone(&self.store);
                let dispatcher = Arc::clone(&self.dispatcher);
                let managed_by = managed_by.clone();
                let rendered = key.to_string();

                let handle = tokio::spawn(async move {
                    dispatch_one(&store, dispatcher.as_ref(), &key, &managed_by).await
                });

                async move {
                    match handle.await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            tracing::error!(key = %rendered, error = %e, "Scan dispatch task failed");
                            DispatchOutcome::Panic
                        }
                    }
                }
            })
            .buffer_unordered(self.config.max_concurrent_dispatches)
            .collect::<Vec<_>>()
            .await;

        for outcome in outcomes {
            metrics::record_dispatch(outcome);
            report.record(outcome);
        }

        report
    }
}

async fn dispatch_one(
    store: &ScanApiStore,
    dispatcher: &dyn ScanDispatcher,
    key: &ResourceKey,
    managed_by: &ManagedBy,
) -> DispatchOutcome {
    let Some(target) = store.lookup(key.namespace()).await else {
        tracing::debug!(key = %key, "No scan target registered, skipping");
        return DispatchOutcome::NoTarget;
    };

    let request = ScanRequest::new(key, managed_by);
    match dispatcher.dispatch(&target, &request).await {
        Ok(()) => {
            tracing::debug!(key = %key, endpoint = %target.endpoint, "Scan triggered");
            DispatchOutcome::Success
        }
        Err(e) => {
            tracing::warn!(
                key = %key,
                endpoint = %target.endpoint,
                error = %e,
                "Scan dispatch failed, dropping until next change"
            );
            DispatchOutcome::Failure
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Debouncer errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DebouncerError {
    #[error("Debouncer already started (state: {0})")]
    AlreadyStarted(DebouncerState),

    #[error("Invalid debouncer configuration: {0}")]
    InvalidConfig(ConfigError),
}

// ============================================================================
// Tests
// ============================================================================
