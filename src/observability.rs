use std::net::SocketAddr;

// ── Request-driven ──────────────────────────────────────────────

/// Counter: intake requests applied. Labels: op.
pub const REQUESTS_TOTAL: &str = "acsched_requests_total";

/// Counter: submissions dropped after the intake timeout.
pub const SUBMISSIONS_DROPPED_TOTAL: &str = "acsched_submissions_dropped_total";

/// Counter: tick decisions that moved a slot into service. Labels: kind.
pub const DECISIONS_TOTAL: &str = "acsched_decisions_total";

/// Histogram: time spent in one tick, lock included, in seconds.
pub const TICK_DURATION_SECONDS: &str = "acsched_tick_duration_seconds";

// ── Capacity ────────────────────────────────────────────────────

/// Gauge: slots in service.
pub const ACTIVE_SLOTS: &str = "acsched_active_slots";

/// Gauge: slots waiting.
pub const WAITING_SLOTS: &str = "acsched_waiting_slots";

// ── Billing ─────────────────────────────────────────────────────

/// Counter: usage records produced.
pub const SETTLEMENTS_TOTAL: &str = "acsched_settlements_total";

/// Counter: usage records the ledger failed to persist.
pub const SETTLEMENT_FAILURES_TOTAL: &str = "acsched_settlement_failures_total";

/// Histogram: ledger group-commit flush duration in seconds.
pub const LEDGER_FLUSH_DURATION_SECONDS: &str = "acsched_ledger_flush_duration_seconds";

/// Histogram: ledger group-commit batch size (records per flush).
pub const LEDGER_FLUSH_BATCH_SIZE: &str = "acsched_ledger_flush_batch_size";

// ── Control connections ─────────────────────────────────────────

/// Gauge: open control connections.
pub const CONNECTIONS_ACTIVE: &str = "acsched_connections_active";

/// Counter: control connections accepted.
pub const CONNECTIONS_TOTAL: &str = "acsched_connections_total";

/// Counter: control connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "acsched_connections_rejected_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter: {e}"),
    }
}
