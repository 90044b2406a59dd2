//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the hub is accepting commands.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Sessions currently in the directory.
    pub connections: usize,
}

/// Build a health response from the hub's current membership.
pub fn health_check(start_time: Instant, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}

/// Response used once the hub has stopped.
pub fn hub_unavailable(start_time: Instant) -> HealthResponse {
    HealthResponse {
        status: "unavailable".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: 0,
    }
}
