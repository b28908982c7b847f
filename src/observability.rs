use std::net::SocketAddr;

use crate::model::Event;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total committed mutations. Labels: op.
pub const MUTATIONS_TOTAL: &str = "slotwise_mutations_total";

/// Counter: reserve/reschedule attempts rejected with a conflict.
pub const CONFLICTS_TOTAL: &str = "slotwise_conflicts_total";

/// Counter: total read queries served.
pub const QUERIES_TOTAL: &str = "slotwise_queries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of resource partitions in the store.
pub const RESOURCES_ACTIVE: &str = "slotwise_resources_active";

/// Gauge: live change-feed listeners.
pub const FEED_LISTENERS_ACTIVE: &str = "slotwise_feed_listeners_active";

/// Counter: listeners terminated because they fell behind the feed.
pub const FEED_LAGGED_TOTAL: &str = "slotwise_feed_lagged_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map an event variant to a short label for metrics.
pub fn op_label(event: &Event) -> &'static str {
    match event {
        Event::Created { .. } => "reserve",
        Event::NoteUpdated { .. } => "update_note",
        Event::Rescheduled { .. } => "reschedule",
        Event::Confirmed { .. } => "confirm",
        Event::Cancelled { .. } => "cancel",
    }
}
