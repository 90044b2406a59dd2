//! Per-connection pumps.
//!
//! Each WebSocket is split in two tasks: the inbound pump decodes frames and
//! forwards events to the hub, the outbound pump drains the session's queue
//! onto the socket and keeps the transport alive with pings. A peer that
//! sends nothing, not even a pong, for longer than the client timeout is
//! dropped. When either side stops, the connection is unregistered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use proxichat_core::{ClientEvent, ClientId, Payload};
use proxichat_hub::{metrics, HubHandle};
use proxichat_telemetry::MetricsRecorder;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::server::AppState;

/// Time of the last frame received from a peer, shared by both pumps.
#[derive(Clone, Debug)]
pub struct Liveness {
    epoch: Instant,
    // millis since `epoch`
    last_seen: Arc<AtomicU64>,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_seen: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record inbound activity (any frame, pongs included).
    pub fn record(&self) {
        let millis = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_seen.store(millis, Ordering::Relaxed);
    }

    /// Time since the last recorded frame, or since creation.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_seen.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Ping cadence and the silence tolerated before giving up on a peer.
#[derive(Clone, Debug)]
pub struct KeepAlive {
    pub ping_every: Duration,
    pub timeout: Duration,
    pub liveness: Liveness,
}

/// Run one accepted WebSocket until it closes or is evicted.
pub async fn serve_connection(socket: WebSocket, client_id: ClientId, state: AppState) {
    let (tx, rx) = mpsc::channel(state.config.send_queue_capacity);
    let serial = match state.hub.register(client_id.clone(), tx).await {
        Ok(serial) => serial,
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "rejecting connection");
            return;
        }
    };
    info!(client_id = %client_id, serial, "client connected");

    let (ws_tx, ws_rx) = socket.split();
    let liveness = Liveness::new();
    let keepalive = KeepAlive {
        ping_every: state.config.ping_interval(),
        timeout: state.config.client_timeout(),
        liveness: liveness.clone(),
    };

    let mut writer = tokio::spawn(run_outbound(ws_tx, rx, keepalive, client_id.clone()));
    let mut reader = tokio::spawn(run_inbound(
        ws_rx,
        state.hub.clone(),
        client_id.clone(),
        serial,
        liveness,
        Arc::clone(&state.metrics),
    ));

    // A finished reader leaves the writer to flush until the hub closes the
    // queue; a finished writer means the socket is unusable or the peer
    // went silent.
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => {}
    }

    if state.hub.unregister(client_id.clone(), serial).await.is_err() {
        debug!(client_id = %client_id, "hub already stopped");
    }
    info!(client_id = %client_id, serial, "client disconnected");
}

/// Drain `queue` onto `sink` in order, pinging every `keepalive.ping_every`.
///
/// Returns on the first failed write, when the peer has been silent for
/// longer than `keepalive.timeout` at a ping tick, or after the queue is
/// closed and empty, in which case a close frame is sent.
pub async fn run_outbound<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Payload>,
    keepalive: KeepAlive,
    client_id: ClientId,
) where
    S: Sink<WsMessage> + Unpin,
{
    let mut ping_interval = tokio::time::interval(keepalive.ping_every);
    ping_interval.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            payload = queue.recv() => match payload {
                Some(payload) => {
                    if sink.send(WsMessage::Text(payload.to_string().into())).await.is_err() {
                        debug!(client_id = %client_id, "write failed, stopping outbound pump");
                        return;
                    }
                }
                None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    trace!(client_id = %client_id, "outbound queue closed");
                    return;
                }
            },
            _ = ping_interval.tick() => {
                let idle = keepalive.liveness.idle_for();
                if idle > keepalive.timeout {
                    warn!(client_id = %client_id, idle_secs = idle.as_secs(), "peer unresponsive, dropping connection");
                    return;
                }
                if sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    debug!(client_id = %client_id, "ping failed, stopping outbound pump");
                    return;
                }
                trace!(client_id = %client_id, "sent ping");
            }
        }
    }
}

/// Decode frames from `stream` and forward them to the hub.
///
/// Undecodable frames are logged and skipped. Returns on close, read error,
/// or when the hub is gone.
pub async fn run_inbound<R>(
    mut stream: R,
    hub: HubHandle,
    client_id: ClientId,
    serial: u64,
    liveness: Liveness,
    recorder: Arc<MetricsRecorder>,
) where
    R: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => {
                liveness.record();
                frame
            }
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "read failed, stopping inbound pump");
                return;
            }
        };
        let decoded = match &frame {
            WsMessage::Text(text) => ClientEvent::decode(text.as_str().as_bytes()),
            WsMessage::Binary(bytes) => ClientEvent::decode(bytes),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            WsMessage::Close(_) => return,
        };
        match decoded {
            Ok(event) => {
                trace!(client_id = %client_id, kind = event.kind(), "event received");
                if hub.dispatch(client_id.clone(), serial, event).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "skipping undecodable message");
                recorder.counter_inc(metrics::DECODE_ERRORS_TOTAL, &[], 1);
            }
        }
    }
}
