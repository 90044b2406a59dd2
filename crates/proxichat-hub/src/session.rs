use proxichat_core::{ClientId, Payload, UserStatus, UserView};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Sending half of a connection's bounded outbound queue.
pub type Outbound = mpsc::Sender<Payload>;

/// Result of a non-blocking enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    Full,
    /// The outbound pump has already gone away.
    Closed,
}

/// Server-side record of one connected client.
///
/// Owned by the [`Directory`](crate::Directory); dropping it drops the
/// outbound sender, which closes the queue and lets the outbound pump finish.
#[derive(Debug)]
pub struct Session {
    pub id: ClientId,
    /// Connection serial, unique per registration.
    pub serial: u64,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub status: UserStatus,
    pub partner_id: Option<ClientId>,
    /// Target of the outstanding `request_chat`, set only while Requesting.
    pub pending_target: Option<ClientId>,
    outbound: Outbound,
}

impl Session {
    pub fn new(id: ClientId, serial: u64, outbound: Outbound) -> Self {
        Self {
            id,
            serial,
            name: String::new(),
            lat: 0.0,
            lon: 0.0,
            status: UserStatus::Idle,
            partner_id: None,
            pending_target: None,
            outbound,
        }
    }

    /// Try to enqueue without waiting.
    pub fn offer(&self, payload: Payload) -> Delivery {
        match self.outbound.try_send(payload) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    pub fn is_paired_with(&self, other: &ClientId) -> bool {
        self.partner_id.as_ref() == Some(other)
    }

    pub(crate) fn reset(&mut self) {
        self.status = UserStatus::Idle;
        self.partner_id = None;
        self.pending_target = None;
    }

    pub fn view(&self) -> UserView {
        UserView {
            id: self.id.clone(),
            name: self.name.clone(),
            lat: self.lat,
            lon: self.lon,
            status: self.status,
            partner_id: self
                .partner_id
                .as_ref()
                .map(|p| p.as_str().to_owned())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_idle_and_unnamed() {
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new("a".into(), 1, tx);
        let view = session.view();
        assert_eq!(view.status, UserStatus::Idle);
        assert_eq!(view.name, "");
        assert_eq!(view.partner_id, "");
    }

    #[test]
    fn offer_reports_full_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let session = Session::new("a".into(), 1, tx);
        assert_eq!(session.offer("one".into()), Delivery::Queued);
        assert_eq!(session.offer("two".into()), Delivery::Full);
        drop(rx);
        assert_eq!(session.offer("three".into()), Delivery::Closed);
    }

    #[test]
    fn view_exposes_partner_id() {
        let (tx, _rx) = mpsc::channel(1);
        let mut session = Session::new("a".into(), 1, tx);
        session.status = UserStatus::Chatting;
        session.partner_id = Some("b".into());
        assert_eq!(session.view().partner_id, "b");
        assert!(session.is_paired_with(&"b".into()));

        session.reset();
        assert_eq!(session.view().partner_id, "");
        assert_eq!(session.status, UserStatus::Idle);
    }

    #[test]
    fn reset_clears_pending_request() {
        let (tx, _rx) = mpsc::channel(1);
        let mut session = Session::new("a".into(), 1, tx);
        session.status = UserStatus::Requesting;
        session.pending_target = Some("b".into());

        session.reset();
        assert_eq!(session.status, UserStatus::Idle);
        assert_eq!(session.pending_target, None);
    }
}
