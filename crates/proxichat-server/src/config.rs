//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the proxichat server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `8080`, `0` for auto-assign).
    pub port: u16,
    /// Per-connection outbound queue bound.
    pub send_queue_capacity: usize,
    /// Hub command queue bound.
    pub hub_queue_capacity: usize,
    /// Transport ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Seconds without any inbound frame before a peer is dropped.
    pub client_timeout_secs: u64,
    /// Directory of static web assets; `None` disables asset serving.
    pub static_dir: Option<PathBuf>,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            send_queue_capacity: 256,
            hub_queue_capacity: 1024,
            ping_interval_secs: 30,
            client_timeout_secs: 90,
            static_dir: Some(PathBuf::from("web/dist")),
            max_message_size: 64 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Ping interval, never shorter than one second.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// Silence allowed from a peer, never shorter than one ping interval.
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs).max(self.ping_interval())
    }
}
