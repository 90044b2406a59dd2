use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use proxichat_server::ServerConfig;
use proxichat_telemetry::{init_telemetry, TelemetryConfig};
use tracing::Level;

/// Real-time presence and one-to-one chat matching server.
#[derive(Debug, Parser)]
#[command(name = "proxichat", version)]
struct Args {
    /// Address to bind.
    #[arg(long, env = "PROXICHAT_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 picks a free port).
    #[arg(long, env = "PROXICHAT_PORT", default_value_t = 8080)]
    port: u16,

    /// Directory of static web assets.
    #[arg(long, env = "PROXICHAT_STATIC_DIR", default_value = "web/dist")]
    static_dir: PathBuf,

    /// Do not serve static assets.
    #[arg(long, env = "PROXICHAT_NO_STATIC")]
    no_static: bool,

    /// Outbound queue bound per connection.
    #[arg(long, env = "PROXICHAT_SEND_QUEUE", default_value_t = 256)]
    send_queue: usize,

    /// Default log level; RUST_LOG takes precedence.
    #[arg(long, env = "PROXICHAT_LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Emit JSON log lines.
    #[arg(long, env = "PROXICHAT_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            send_queue_capacity: self.send_queue.max(1),
            static_dir: (!self.no_static).then(|| self.static_dir.clone()),
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: args.log_level,
        json: args.log_json,
        ..TelemetryConfig::default()
    });

    let config = args.server_config();
    tracing::info!(
        host = %config.host,
        port = config.port,
        static_dir = ?config.static_dir,
        "starting proxichat"
    );

    let handle = proxichat_server::start(config, telemetry.metrics())
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port(), "proxichat ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
