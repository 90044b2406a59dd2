use std::collections::HashMap;
use std::sync::Arc;

use proxichat_core::{ClientId, ServerMessage, UserStatus, UserView};
use proxichat_telemetry::MetricsRecorder;
use tracing::{debug, error, info, trace, warn};

use crate::metrics;
use crate::session::{Delivery, Session};

pub(crate) const PARTNER_DISCONNECTED: &str = "Partner disconnected";

/// Authoritative map of connected sessions.
///
/// Not synchronized: the directory lives inside the hub task and every
/// operation runs to completion before the next one starts.
pub struct Directory {
    clients: HashMap<ClientId, Session>,
    metrics: Arc<MetricsRecorder>,
}

impl Directory {
    pub fn new(metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            clients: HashMap::new(),
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn lookup(&self, id: &ClientId) -> Option<&Session> {
        self.clients.get(id)
    }

    pub(crate) fn lookup_mut(&mut self, id: &ClientId) -> Option<&mut Session> {
        self.clients.get_mut(id)
    }

    /// Add a session and broadcast. An existing session under the same id is
    /// replaced: its partner is released, its pending request withdrawn and
    /// its queue closed.
    pub fn register(&mut self, session: Session) {
        let id = session.id.clone();
        info!(client_id = %id, serial = session.serial, "session registered");
        self.metrics.counter_inc(metrics::CONNECTIONS_TOTAL, &[], 1);

        if let Some(previous) = self.clients.insert(id.clone(), session) {
            warn!(
                client_id = %id,
                previous_serial = previous.serial,
                "duplicate id, replacing previous session"
            );
            self.settle_departure(&previous);
        }
        self.record_membership();
        self.snapshot();
    }

    /// Remove the session registered under `id` with `serial`, releasing its
    /// partner, then broadcast. The broadcast runs even when nothing matched.
    pub fn unregister(&mut self, id: &ClientId, serial: u64) {
        match self.clients.get(id).map(|s| s.serial) {
            Some(current) if current == serial => {
                self.remove(id);
                info!(client_id = %id, serial, "session unregistered");
            }
            Some(current) => {
                debug!(
                    client_id = %id,
                    serial,
                    current_serial = current,
                    "stale unregister ignored"
                );
            }
            None => debug!(client_id = %id, serial, "unregister for unknown session"),
        }
        self.snapshot();
    }

    /// Broadcast the presence snapshot to every session.
    ///
    /// A session whose queue cannot take the snapshot is evicted through the
    /// unregister path and the snapshot is rebuilt and sent again, until a
    /// pass completes without evictions.
    pub fn snapshot(&mut self) {
        loop {
            let unresponsive = self.fan_out_snapshot();
            if unresponsive.is_empty() {
                return;
            }
            for id in unresponsive {
                warn!(client_id = %id, "outbound queue full, evicting session");
                self.metrics.counter_inc(metrics::EVICTIONS_TOTAL, &[], 1);
                self.remove(&id);
            }
        }
    }

    /// Current presence snapshot, ordered by id.
    pub fn presence(&self) -> Vec<UserView> {
        let mut users: Vec<UserView> = self.clients.values().map(Session::view).collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    /// Enqueue a targeted message. A full queue drops the message without
    /// evicting. Returns whether it was queued.
    pub fn send_to(&self, id: &ClientId, message: &ServerMessage) -> bool {
        let Some(session) = self.clients.get(id) else {
            return false;
        };
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(client_id = %id, kind = message.kind(), error = %e, "failed to encode message");
                return false;
            }
        };
        match session.offer(payload) {
            Delivery::Queued => {
                trace!(client_id = %id, kind = message.kind(), "message queued");
                true
            }
            Delivery::Full | Delivery::Closed => {
                warn!(client_id = %id, kind = message.kind(), "send queue full, dropping message");
                self.metrics
                    .counter_inc(metrics::TARGETED_DROPS_TOTAL, &[("type", message.kind())], 1);
                false
            }
        }
    }

    /// Pair two sessions in one step. Both must be present.
    pub(crate) fn pair(&mut self, a: &ClientId, b: &ClientId) {
        if !(self.clients.contains_key(a) && self.clients.contains_key(b)) {
            return;
        }
        for (this, other) in [(a, b), (b, a)] {
            if let Some(session) = self.clients.get_mut(this) {
                session.status = UserStatus::Chatting;
                session.partner_id = Some(other.clone());
                session.pending_target = None;
            }
        }
    }

    /// Reset `partner` to Idle if it is still paired with `from`.
    pub(crate) fn release(&mut self, partner: &ClientId, from: &ClientId) -> bool {
        match self.clients.get_mut(partner) {
            Some(session) if session.is_paired_with(from) => {
                session.reset();
                true
            }
            _ => false,
        }
    }

    /// Ids of sessions that break pairing symmetry. Empty when consistent.
    pub fn pairing_violations(&self) -> Vec<ClientId> {
        let mut broken: Vec<ClientId> = self
            .clients
            .values()
            .filter(|s| {
                let chatting = s.status == UserStatus::Chatting;
                match &s.partner_id {
                    None => chatting,
                    Some(partner) => {
                        !chatting
                            || !self.clients.get(partner).is_some_and(|p| {
                                p.status == UserStatus::Chatting && p.is_paired_with(&s.id)
                            })
                    }
                }
            })
            .map(|s| s.id.clone())
            .collect();
        broken.sort();
        broken
    }

    fn remove(&mut self, id: &ClientId) -> Option<Session> {
        let session = self.clients.remove(id)?;
        self.settle_departure(&session);
        self.record_membership();
        Some(session)
    }

    /// Resolve what a departing session owed others: its partner is
    /// released and the target of its outstanding request is told the
    /// request is gone.
    fn settle_departure(&mut self, departed: &Session) {
        if departed.status == UserStatus::Requesting {
            if let Some(target) = departed.pending_target.as_ref() {
                if self.send_to(target, &ServerMessage::RequestCancelled) {
                    debug!(client_id = %target, departed = %departed.id, "pending request withdrawn");
                }
            }
        }
        let Some(partner) = departed.partner_id.as_ref() else {
            return;
        };
        if self.release(partner, &departed.id) {
            debug!(client_id = %partner, departed = %departed.id, "partner released");
            self.send_to(
                partner,
                &ServerMessage::ChatEnded {
                    message: PARTNER_DISCONNECTED.into(),
                },
            );
        }
    }

    /// Offer one snapshot to every session; returns the ids that refused it.
    fn fan_out_snapshot(&self) -> Vec<ClientId> {
        let message = ServerMessage::WorldState {
            users: self.presence(),
        };
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "failed to encode presence snapshot");
                return Vec::new();
            }
        };

        let mut unresponsive = Vec::new();
        for session in self.clients.values() {
            if session.offer(payload.clone()) != Delivery::Queued {
                self.metrics.counter_inc(metrics::SNAPSHOT_DROPS_TOTAL, &[], 1);
                unresponsive.push(session.id.clone());
            }
        }
        trace!(recipients = self.clients.len(), dropped = unresponsive.len(), "presence snapshot sent");
        unresponsive
    }

    fn record_membership(&self) {
        self.metrics
            .gauge_set(metrics::SESSIONS_ACTIVE, &[], self.clients.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connect, directory, drain, next_serial, snapshots, targeted};
    use tokio::sync::mpsc;

    fn world(messages: &[ServerMessage]) -> Vec<UserView> {
        messages
            .iter()
            .rev()
            .find_map(|m| match m {
                ServerMessage::WorldState { users } => Some(users.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn register_broadcasts_to_everyone() {
        let mut dir = directory();
        let mut a = connect(&mut dir, "a", 8);
        let (tx, mut b) = mpsc::channel(8);
        dir.register(Session::new("b".into(), next_serial(), tx));

        let seen_by_a = drain(&mut a);
        let seen_by_b = drain(&mut b);
        assert_eq!(snapshots(&seen_by_a), 1);
        assert_eq!(world(&seen_by_a).len(), 2);
        assert_eq!(world(&seen_by_b).len(), 2);
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn presence_is_sorted_and_has_empty_partner() {
        let mut dir = directory();
        let _c = connect(&mut dir, "c", 8);
        let _a = connect(&mut dir, "a", 8);
        let _b = connect(&mut dir, "b", 8);
        let users = dir.presence();
        let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert!(users.iter().all(|u| u.partner_id.is_empty()));
    }

    #[test]
    fn unregister_releases_partner_with_one_notice() {
        let mut dir = directory();
        let _a = connect(&mut dir, "a", 8);
        let mut b = connect(&mut dir, "b", 8);
        dir.pair(&"a".into(), &"b".into());
        let serial = dir.lookup(&"a".into()).unwrap().serial;

        dir.unregister(&"a".into(), serial);

        let b_session = dir.lookup(&"b".into()).unwrap();
        assert_eq!(b_session.status, UserStatus::Idle);
        assert_eq!(b_session.partner_id, None);
        assert_eq!(
            targeted(&mut b),
            vec![ServerMessage::ChatEnded { message: PARTNER_DISCONNECTED.into() }]
        );
        assert!(dir.pairing_violations().is_empty());
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn unregister_of_requester_withdraws_pending_request() {
        let mut dir = directory();
        let _r = connect(&mut dir, "r", 8);
        let mut c = connect(&mut dir, "c", 8);
        let r = dir.lookup_mut(&"r".into()).unwrap();
        r.status = UserStatus::Requesting;
        r.pending_target = Some("c".into());
        let serial = r.serial;
        drain(&mut c);

        dir.unregister(&"r".into(), serial);

        assert_eq!(targeted(&mut c), vec![ServerMessage::RequestCancelled]);
        assert_eq!(dir.lookup(&"c".into()).unwrap().status, UserStatus::Idle);
    }

    #[test]
    fn replaced_requester_withdraws_pending_request() {
        let mut dir = directory();
        let _old = connect(&mut dir, "r", 8);
        let mut c = connect(&mut dir, "c", 8);
        let r = dir.lookup_mut(&"r".into()).unwrap();
        r.status = UserStatus::Requesting;
        r.pending_target = Some("c".into());
        drain(&mut c);

        let _new = connect(&mut dir, "r", 8);

        assert_eq!(targeted(&mut c), vec![ServerMessage::RequestCancelled]);
        assert_eq!(dir.lookup(&"r".into()).unwrap().status, UserStatus::Idle);
    }

    #[test]
    fn pairing_clears_pending_request() {
        let mut dir = directory();
        let _a = connect(&mut dir, "a", 8);
        let _b = connect(&mut dir, "b", 8);
        let a = dir.lookup_mut(&"a".into()).unwrap();
        a.status = UserStatus::Requesting;
        a.pending_target = Some("b".into());

        dir.pair(&"a".into(), &"b".into());
        assert_eq!(dir.lookup(&"a".into()).unwrap().pending_target, None);
    }

    #[test]
    fn unregister_closes_the_queue() {
        let mut dir = directory();
        let mut a = connect(&mut dir, "a", 8);
        let serial = dir.lookup(&"a".into()).unwrap().serial;
        dir.unregister(&"a".into(), serial);
        assert!(matches!(a.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
    }

    #[test]
    fn unregister_of_absent_session_still_broadcasts() {
        let mut dir = directory();
        let mut a = connect(&mut dir, "a", 8);
        dir.unregister(&"ghost".into(), 99);
        assert_eq!(snapshots(&drain(&mut a)), 1);
    }

    #[test]
    fn stale_unregister_keeps_replacement() {
        let mut dir = directory();
        let _old = connect(&mut dir, "a", 8);
        let old_serial = dir.lookup(&"a".into()).unwrap().serial;
        let mut new = connect(&mut dir, "a", 8);
        assert_eq!(dir.len(), 1);

        dir.unregister(&"a".into(), old_serial);
        assert_eq!(dir.len(), 1);
        assert_eq!(snapshots(&drain(&mut new)), 1);
    }

    #[test]
    fn duplicate_registration_closes_old_queue_and_releases_partner() {
        let mut dir = directory();
        let mut old = connect(&mut dir, "a", 8);
        let mut b = connect(&mut dir, "b", 8);
        dir.pair(&"a".into(), &"b".into());

        let _new = connect(&mut dir, "a", 8);

        drain(&mut old);
        assert!(matches!(old.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
        assert_eq!(dir.lookup(&"b".into()).unwrap().status, UserStatus::Idle);
        assert_eq!(targeted(&mut b).len(), 1);
        assert!(dir.pairing_violations().is_empty());
    }

    #[test]
    fn full_queue_on_broadcast_evicts() {
        let mut dir = directory();
        let mut a = connect(&mut dir, "a", 8);
        let (tx, slow) = mpsc::channel(1);
        dir.register(Session::new("slow".into(), next_serial(), tx));
        // `slow` holds its welcome snapshot and is now full.
        drain(&mut a);

        dir.snapshot();

        assert!(dir.lookup(&"slow".into()).is_none());
        let seen = drain(&mut a);
        let last = world(&seen);
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].id.as_str(), "a");
        drop(slow);
    }

    #[test]
    fn eviction_notifies_partner() {
        let mut dir = directory();
        let mut a = connect(&mut dir, "a", 8);
        let (tx, _slow) = mpsc::channel(1);
        dir.register(Session::new("slow".into(), next_serial(), tx));
        dir.pair(&"a".into(), &"slow".into());
        drain(&mut a);

        dir.snapshot();

        assert!(dir.lookup(&"slow".into()).is_none());
        let a_session = dir.lookup(&"a".into()).unwrap();
        assert_eq!(a_session.status, UserStatus::Idle);
        assert_eq!(
            targeted(&mut a),
            vec![ServerMessage::ChatEnded { message: PARTNER_DISCONNECTED.into() }]
        );
        assert!(dir.pairing_violations().is_empty());
    }

    #[test]
    fn closed_queue_on_broadcast_evicts() {
        let mut dir = directory();
        let rx = connect(&mut dir, "gone", 8);
        drop(rx);
        dir.snapshot();
        assert!(dir.is_empty());
    }

    #[test]
    fn targeted_send_on_full_queue_drops_without_eviction() {
        let mut dir = directory();
        let (tx, _rx) = mpsc::channel(1);
        dir.register(Session::new("a".into(), next_serial(), tx));

        let queued = dir.send_to(&"a".into(), &ServerMessage::ChatDeclined);
        assert!(!queued);
        assert!(dir.lookup(&"a".into()).is_some());
    }

    #[test]
    fn send_to_unknown_id_is_false() {
        let dir = directory();
        assert!(!dir.send_to(&"nobody".into(), &ServerMessage::ChatDeclined));
    }

    #[test]
    fn pairing_violations_detects_one_sided_partner() {
        let mut dir = directory();
        let _a = connect(&mut dir, "a", 8);
        let _b = connect(&mut dir, "b", 8);
        let a = dir.lookup_mut(&"a".into()).unwrap();
        a.status = UserStatus::Chatting;
        a.partner_id = Some("b".into());
        assert_eq!(dir.pairing_violations(), vec![ClientId::from("a")]);

        dir.pair(&"a".into(), &"b".into());
        assert!(dir.pairing_violations().is_empty());
    }

    #[test]
    fn release_requires_back_reference() {
        let mut dir = directory();
        let _a = connect(&mut dir, "a", 8);
        let _b = connect(&mut dir, "b", 8);
        let _c = connect(&mut dir, "c", 8);
        dir.pair(&"a".into(), &"b".into());

        assert!(!dir.release(&"b".into(), &"c".into()));
        assert!(dir.release(&"b".into(), &"a".into()));
        assert_eq!(dir.lookup(&"b".into()).unwrap().status, UserStatus::Idle);
    }
}
