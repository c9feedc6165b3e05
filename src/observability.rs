use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tutord_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tutord_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tutord_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tutord_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tutord_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "tutord_tenants_active";

/// Counter: pending requests auto-cancelled by the reaper.
pub const REQUESTS_EXPIRED_TOTAL: &str = "tutord_requests_expired_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tutord_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tutord_wal_flush_batch_size";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::UpsertUser { .. } => "upsert_user",
        Command::InsertSubject { .. } => "insert_subject",
        Command::LinkTutorSubject { .. } => "link_tutor_subject",
        Command::UnlinkTutorSubject { .. } => "unlink_tutor_subject",
        Command::DeclareAvailability { .. } => "declare_availability",
        Command::SelectAvailability { .. } => "select_availability",
        Command::InsertSession { .. } => "insert_session",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectSessionById { .. } => "select_session",
        Command::SelectSessionsByUser { .. } => "select_sessions",
        Command::AcceptSession { .. } => "accept_session",
        Command::CancelSession { .. } => "cancel_session",
        Command::CompleteSession { .. } => "complete_session",
        Command::InsertProposal { .. } => "insert_proposal",
        Command::AcceptProposal { .. } => "accept_proposal",
        Command::RejectProposal { .. } => "reject_proposal",
        Command::Listen { .. } => "listen",
    }
}
