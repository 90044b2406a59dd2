// Metric name constants shared by the hub and the transport.

/// Registrations accepted (counter).
pub const CONNECTIONS_TOTAL: &str = "hub.connections.total";
/// Sessions currently in the directory (gauge).
pub const SESSIONS_ACTIVE: &str = "hub.sessions.active";
/// Sessions evicted for an unresponsive outbound queue (counter).
pub const EVICTIONS_TOTAL: &str = "hub.evictions.total";
/// Presence snapshots that could not be enqueued (counter).
pub const SNAPSHOT_DROPS_TOTAL: &str = "hub.snapshot.drops.total";
/// Targeted messages dropped on a full queue (counter, labels: type).
pub const TARGETED_DROPS_TOTAL: &str = "hub.targeted.drops.total";
/// Client events processed (counter, labels: type).
pub const EVENTS_TOTAL: &str = "hub.events.total";
/// Inbound frames that failed to decode (counter).
pub const DECODE_ERRORS_TOTAL: &str = "session.decode.errors.total";
