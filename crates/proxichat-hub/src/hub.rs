use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use proxichat_core::{ClientEvent, ClientId, UserView};
use proxichat_telemetry::MetricsRecorder;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::directory::Directory;
use crate::errors::HubError;
use crate::matching::{self, Outcome};
use crate::metrics;
use crate::session::{Outbound, Session};

/// Operations processed, one at a time, by the hub task.
#[derive(Debug)]
pub enum HubCommand {
    Register(Session),
    Unregister {
        id: ClientId,
        serial: u64,
    },
    Event {
        id: ClientId,
        serial: u64,
        event: ClientEvent,
    },
    /// Reply with the current presence snapshot.
    Inspect {
        reply: oneshot::Sender<Vec<UserView>>,
    },
}

/// Single writer for the [`Directory`].
pub struct Hub {
    directory: Directory,
    commands: mpsc::Receiver<HubCommand>,
    metrics: Arc<MetricsRecorder>,
}

impl Hub {
    /// Create a hub with a command queue of `capacity` and a handle to it.
    pub fn new(capacity: usize, metrics: Arc<MetricsRecorder>) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(capacity);
        let hub = Self {
            directory: Directory::new(Arc::clone(&metrics)),
            commands: rx,
            metrics,
        };
        let handle = HubHandle {
            commands: tx,
            serials: Arc::new(AtomicU64::new(0)),
        };
        (hub, handle)
    }

    /// Process commands until every handle is dropped or `cancel` fires.
    /// Remaining sessions are dropped on exit, closing their queues.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("hub started");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        info!(sessions = self.directory.len(), "hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(session) => self.directory.register(session),
            HubCommand::Unregister { id, serial } => self.directory.unregister(&id, serial),
            HubCommand::Event { id, serial, event } => self.dispatch(&id, serial, event),
            HubCommand::Inspect { reply } => {
                let _ = reply.send(self.directory.presence());
            }
        }
        debug_assert!(
            self.directory.pairing_violations().is_empty(),
            "asymmetric pairing: {:?}",
            self.directory.pairing_violations()
        );
    }

    fn dispatch(&mut self, id: &ClientId, serial: u64, event: ClientEvent) {
        let kind = event.kind();
        self.metrics.counter_inc(metrics::EVENTS_TOTAL, &[("type", kind)], 1);

        if self.directory.lookup(id).map(|s| s.serial) != Some(serial) {
            debug!(client_id = %id, serial, kind, "event from replaced or evicted connection dropped");
            return;
        }
        match matching::apply(&mut self.directory, id, event) {
            Outcome::Applied => debug!(client_id = %id, kind, "event applied"),
            Outcome::Ignored => debug!(client_id = %id, kind, "event ignored"),
        }
    }
}

/// Cloneable sender side of the hub.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    serials: Arc<AtomicU64>,
}

impl HubHandle {
    /// Register a connection; returns the serial identifying this registration.
    pub async fn register(&self, id: ClientId, outbound: Outbound) -> Result<u64, HubError> {
        let serial = self.serials.fetch_add(1, Ordering::Relaxed) + 1;
        self.send(HubCommand::Register(Session::new(id, serial, outbound)))
            .await?;
        Ok(serial)
    }

    pub async fn unregister(&self, id: ClientId, serial: u64) -> Result<(), HubError> {
        self.send(HubCommand::Unregister { id, serial }).await
    }

    pub async fn dispatch(&self, id: ClientId, serial: u64, event: ClientEvent) -> Result<(), HubError> {
        self.send(HubCommand::Event { id, serial, event }).await
    }

    /// Presence snapshot as seen by the hub, ordered after all earlier commands.
    pub async fn presence(&self) -> Result<Vec<UserView>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Inspect { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }
}
