use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings created. Labels: kind.
pub const BOOKINGS_CREATED_TOTAL: &str = "reserva_bookings_created_total";

/// Counter: booking attempts rejected on conflict. Labels: kind.
pub const BOOKING_CONFLICTS_TOTAL: &str = "reserva_booking_conflicts_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "reserva_bookings_cancelled_total";

/// Counter: governed requests created. Labels: kind.
pub const REQUESTS_CREATED_TOTAL: &str = "reserva_requests_created_total";

/// Counter: approval stages recorded. Labels: stage, decision.
pub const APPROVAL_STAGES_SET_TOTAL: &str = "reserva_approval_stages_set_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: registered resources not archived.
pub const RESOURCES_ACTIVE: &str = "reserva_resources_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "reserva_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "reserva_wal_flush_batch_size";

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
