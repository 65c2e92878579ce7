//! Metric names recorded by the gateway.

pub const CONNECTIONS_OPENED: &str = "gateway.connections.opened";
/// Labelled by `reason` (see `SessionEnd::reason`).
pub const CONNECTIONS_CLOSED: &str = "gateway.connections.closed";
pub const SESSIONS_ACTIVE: &str = "gateway.sessions.active";
pub const ACCEPT_ERRORS: &str = "gateway.accept.errors";

pub const LINES_RELAYED: &str = "gateway.lines.relayed";
/// Labelled by `kind` (`BusError::error_kind`).
pub const RELAY_ERRORS: &str = "gateway.relay.errors";
pub const MESSAGES_FORWARDED: &str = "gateway.messages.forwarded";
/// Labelled by `kind`.
pub const POLL_ERRORS: &str = "gateway.bus.poll_errors";
pub const SUBSCRIBE_ERRORS: &str = "gateway.bus.subscribe_errors";

/// Labelled by `outcome`: `ok`, `error`, `rejected`.
pub const UPLOADS: &str = "gateway.uploads";
pub const UPLOAD_BYTES: &str = "gateway.upload.bytes";
/// Labelled by `outcome`.
pub const DOWNLOADS: &str = "gateway.downloads";
pub const DOWNLOAD_SPEED: &str = "gateway.download.mib_per_sec";
pub const METRIC_REPORT_ERRORS: &str = "gateway.metric_report.errors";

pub const OUTBOUND_BYTES: &str = "gateway.outbound.bytes";
