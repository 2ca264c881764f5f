use std::net::SocketAddr;

// ── Booking flow ────────────────────────────────────────────────

/// Counter: bookings successfully allocated.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotbook_bookings_created_total";

/// Counter: booking attempts refused for lack of a free instance (lost races included).
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotbook_booking_conflicts_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "slotbook_bookings_cancelled_total";

/// Counter: admin bookable toggles.
pub const BOOKABLE_TOGGLES_TOTAL: &str = "slotbook_bookable_toggles_total";

/// Counter: HTTP requests. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "slotbook_http_requests_total";

// ── Realtime ────────────────────────────────────────────────────

/// Gauge: connected realtime subscribers. Labels: scope.
pub const REALTIME_SUBSCRIBERS_ACTIVE: &str = "slotbook_realtime_subscribers_active";

/// Counter: events a lagging subscriber never saw. Labels: scope.
pub const REALTIME_EVENTS_DROPPED_TOTAL: &str = "slotbook_realtime_events_dropped_total";

/// Gauge: tenant groups in the registry.
pub const TENANTS_ACTIVE: &str = "slotbook_tenants_active";

/// Counter: upstream telemetry connection attempts that failed or ended.
pub const RELAY_DISCONNECTS_TOTAL: &str = "slotbook_relay_disconnects_total";

/// Counter: measurements forwarded from upstream.
pub const RELAY_MEASUREMENTS_TOTAL: &str = "slotbook_relay_measurements_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
