use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: `Engine::book` attempts. Labels: outcome (booked, conflict, error).
pub const BOOKINGS_TOTAL: &str = "bookings_bookings_total";

/// Histogram: `Engine::book` latency in seconds, including the room lock wait.
pub const BOOKING_DURATION_SECONDS: &str = "bookings_booking_duration_seconds";

/// Counter: availability checks. Labels: kind (room, search).
pub const AVAILABILITY_CHECKS_TOTAL: &str = "bookings_availability_checks_total";

/// Counter: manual blocks placed and removed. Labels: action (block, unblock).
pub const BLOCKS_TOTAL: &str = "bookings_blocks_total";

/// Counter: failed staff logins.
pub const AUTH_FAILURES_TOTAL: &str = "bookings_auth_failures_total";

// ── Storage ─────────────────────────────────────────────────────

/// Counter: repository calls. Labels: op, status (ok, rejected, storage_error).
pub const REPO_CALLS_TOTAL: &str = "bookings_repository_calls_total";

/// Histogram: repository call latency in seconds. Labels: op.
pub const REPO_CALL_DURATION_SECONDS: &str = "bookings_repository_call_duration_seconds";

// ── Mail ────────────────────────────────────────────────────────

/// Counter: messages handed to the mailer.
pub const MAIL_SENT_TOTAL: &str = "bookings_mail_sent_total";

/// Counter: messages the mailer rejected or timed out on.
pub const MAIL_FAILED_TOTAL: &str = "bookings_mail_failed_total";

/// Counter: messages dropped because the queue overflowed.
pub const MAIL_DROPPED_TOTAL: &str = "bookings_mail_dropped_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
