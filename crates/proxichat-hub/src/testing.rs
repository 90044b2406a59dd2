use std::sync::Arc;

use proxichat_core::{ClientId, Payload, ServerMessage};
use proxichat_telemetry::MetricsRecorder;
use tokio::sync::mpsc;

use crate::{Directory, Session};

pub(crate) fn directory() -> Directory {
    Directory::new(Arc::new(MetricsRecorder::new()))
}

/// Register `id` with a queue of `capacity` and discard the welcome snapshot.
pub(crate) fn connect(dir: &mut Directory, id: &str, capacity: usize) -> mpsc::Receiver<Payload> {
    let (tx, mut rx) = mpsc::channel(capacity);
    dir.register(Session::new(ClientId::from(id), next_serial(), tx));
    drain(&mut rx);
    rx
}

pub(crate) fn next_serial() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SERIAL: AtomicU64 = AtomicU64::new(1);
    SERIAL.fetch_add(1, Ordering::Relaxed)
}

/// Everything currently buffered in a queue, decoded.
pub(crate) fn drain(rx: &mut mpsc::Receiver<Payload>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(payload) = rx.try_recv() {
        out.push(serde_json::from_str(&payload).unwrap());
    }
    out
}

/// Buffered messages other than presence snapshots.
pub(crate) fn targeted(rx: &mut mpsc::Receiver<Payload>) -> Vec<ServerMessage> {
    drain(rx)
        .into_iter()
        .filter(|m| !matches!(m, ServerMessage::WorldState { .. }))
        .collect()
}

pub(crate) fn snapshots(messages: &[ServerMessage]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, ServerMessage::WorldState { .. }))
        .count()
}
