//! Prometheus metrics for the debouncer and scan dispatch
//!
//! This module provides metrics tracking for:
//! - Debouncer: keys added per kind, drain cycles, pending-set size
//! - Dispatch: outcome of each scan trigger
//! - Scan-API store: number of registered targets
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use parking_lot::Mutex;
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all scanwatch metrics
struct ScanwatchMetrics {
    keys_added: CounterVec,
    dispatches: CounterVec,
    drain_cycles: Counter,
    drain_size: Histogram,
    pending_keys: Gauge,
    scan_targets: Gauge,
}

static METRICS: OnceLock<ScanwatchMetrics> = OnceLock::new();

// Serializes registration so concurrent callers never register twice
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Outcome label for a single dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    Failure,
    NoTarget,
    Panic,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::NoTarget => "no_target",
            Self::Panic => "panic",
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; later calls are no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = scanwatch::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock();
    if METRICS.get().is_some() {
        return Ok(());
    }

    let metrics = ScanwatchMetrics {
        keys_added: register_counter_vec!(
            "scanwatch_debouncer_keys_added_total",
            "Resource keys forwarded to the debouncer by kind",
            &["kind"]
        )?,
        dispatches: register_counter_vec!(
            "scanwatch_dispatches_total",
            "Scan dispatch attempts by outcome",
            &["outcome"]
        )?,
        drain_cycles: register_counter!(
            "scanwatch_debouncer_drain_cycles_total",
            "Number of debouncer drain cycles"
        )?,
        drain_size: register_histogram!(
            "scanwatch_debouncer_drain_size",
            "Keys drained per cycle",
            vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]
        )?,
        pending_keys: register_gauge!(
            "scanwatch_debouncer_pending_keys",
            "Keys waiting for the next drain cycle"
        )?,
        scan_targets: register_gauge!(
            "scanwatch_scan_api_targets",
            "Registered scan-API targets"
        )?,
    };

    if METRICS.set(metrics).is_ok() {
        tracing::info!("Prometheus metrics initialized successfully");
    }
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    METRICS.get().is_some()
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// ============================================================================
// Recorders
// ============================================================================

pub fn record_key_added(kind: &str) {
    if let Some(m) = METRICS.get() {
        m.keys_added.with_label_values(&[kind]).inc();
    }
}

pub fn record_dispatch(outcome: DispatchOutcome) {
    if let Some(m) = METRICS.get() {
        m.dispatches.with_label_values(&[outcome.as_str()]).inc();
    }
}

/// Record one drain cycle and the number of keys it took
pub fn record_drain(drained: usize) {
    let Some(m) = METRICS.get() else {
        return;
    };

    m.drain_cycles.inc();
    m.drain_size.observe(drained as f64);
}

pub fn set_pending_keys(count: usize) {
    if let Some(m) = METRICS.get() {
        m.pending_keys.set(count as f64);
    }
}

pub fn set_scan_targets(count: usize) {
    if let Some(m) = METRICS.get() {
        m.scan_targets.set(count as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================
