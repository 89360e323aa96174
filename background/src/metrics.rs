//! Prometheus metrics for the request pipeline.
//!
//! The [`PipelineMetrics`] struct owns a dedicated [`Registry`] that the
//! approval surface's `/metrics` endpoint encodes into the Prometheus text
//! exposition format.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter, IntGauge,
    Opts, Registry,
};

/// Central collection of pipeline-level Prometheus metrics.
pub struct PipelineMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Total wallet requests dispatched to a chain handler.
    pub requests_dispatched: IntCounter,
    /// Total requests that failed in a handler (excludes user rejections).
    pub handler_failures: IntCounter,
    /// Total approval prompts opened.
    pub approvals_requested: IntCounter,
    /// Total approvals granted by the user.
    pub approvals_granted: IntCounter,
    /// Total approvals denied (including surface-closed cancellations).
    pub approvals_denied: IntCounter,
    /// Total approvals that aged out at the gate timeout.
    pub approval_timeouts: IntCounter,
    /// Total transactions broadcast.
    pub broadcasts: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Records currently in the pending queue.
    pub pending_records: IntGauge,
}

impl PipelineMetrics {
    /// Create a fresh set of metrics registered under a new [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_dispatched = register_int_counter_with_registry!(
            Opts::new(
                "keybridge_requests_dispatched_total",
                "Wallet requests dispatched to a chain handler"
            ),
            registry
        )
        .expect("failed to register requests_dispatched counter");

        let handler_failures = register_int_counter_with_registry!(
            Opts::new(
                "keybridge_handler_failures_total",
                "Requests that failed inside a chain handler"
            ),
            registry
        )
        .expect("failed to register handler_failures counter");

        let approvals_requested = register_int_counter_with_registry!(
            Opts::new(
                "keybridge_approvals_requested_total",
                "Approval prompts opened"
            ),
            registry
        )
        .expect("failed to register approvals_requested counter");

        let approvals_granted = register_int_counter_with_registry!(
            Opts::new(
                "keybridge_approvals_granted_total",
                "Approvals granted by the user"
            ),
            registry
        )
        .expect("failed to register approvals_granted counter");

        let approvals_denied = register_int_counter_with_registry!(
            Opts::new(
                "keybridge_approvals_denied_total",
                "Approvals denied or cancelled"
            ),
            registry
        )
        .expect("failed to register approvals_denied counter");

        let approval_timeouts = register_int_counter_with_registry!(
            Opts::new(
                "keybridge_approval_timeouts_total",
                "Approvals that aged out at the gate timeout"
            ),
            registry
        )
        .expect("failed to register approval_timeouts counter");

        let broadcasts = register_int_counter_with_registry!(
            Opts::new("keybridge_broadcasts_total", "Transactions broadcast"),
            registry
        )
        .expect("failed to register broadcasts counter");

        let pending_records = register_int_gauge_with_registry!(
            Opts::new(
                "keybridge_pending_records",
                "Records currently awaiting a user decision"
            ),
            registry
        )
        .expect("failed to register pending_records gauge");

        Self {
            registry,
            requests_dispatched,
            handler_failures,
            approvals_requested,
            approvals_granted,
            approvals_denied,
            approval_timeouts,
            broadcasts,
            pending_records,
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_register_and_increment() {
        let metrics = PipelineMetrics::new();
        metrics.requests_dispatched.inc();
        metrics.requests_dispatched.inc();
        assert_eq!(metrics.requests_dispatched.get(), 2);

        metrics.pending_records.set(3);
        assert_eq!(metrics.pending_records.get(), 3);

        let families = metrics.registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "keybridge_requests_dispatched_total"));
    }
}
