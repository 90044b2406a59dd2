//! Pairing rules: idle -> requesting -> chatting -> idle.
//!
//! Each transition reads and writes the directory inside a single hub step,
//! so a half-updated pairing is never observable. Events that do not apply
//! to the current state are ignored without notifying anyone.

use proxichat_core::{ClientEvent, ClientId, ServerMessage, UserStatus};
use tracing::debug;

use crate::directory::Directory;

pub(crate) const CHAT_ENDED: &str = "Chat ended";

/// Whether an event changed anything.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Ignored,
}

/// Apply one decoded event sent by `caller`.
pub fn apply(dir: &mut Directory, caller: &ClientId, event: ClientEvent) -> Outcome {
    if dir.lookup(caller).is_none() {
        debug!(client_id = %caller, kind = event.kind(), "event from unknown session");
        return Outcome::Ignored;
    }
    match event {
        ClientEvent::Login { name, lat, lon } => login(dir, caller, name, lat, lon),
        ClientEvent::UpdateLocation { lat, lon } => update_location(dir, caller, lat, lon),
        ClientEvent::RequestChat { target_id } => request_chat(dir, caller, &target_id),
        ClientEvent::AcceptChat { requester_id } => accept_chat(dir, caller, &requester_id),
        ClientEvent::DeclineChat { requester_id } => decline_chat(dir, &requester_id),
        ClientEvent::CancelRequest { target_id } => cancel_request(dir, caller, &target_id),
        ClientEvent::ChatMsg { content } => chat_msg(dir, caller, content),
        ClientEvent::EndChat {} => end_chat(dir, caller),
    }
}

fn login(
    dir: &mut Directory,
    caller: &ClientId,
    name: String,
    lat: Option<f64>,
    lon: Option<f64>,
) -> Outcome {
    let Some(me) = dir.lookup_mut(caller) else {
        return Outcome::Ignored;
    };
    me.name = name;
    if let Some(lat) = lat {
        me.lat = lat;
    }
    if let Some(lon) = lon {
        me.lon = lon;
    }
    dir.snapshot();
    Outcome::Applied
}

fn update_location(dir: &mut Directory, caller: &ClientId, lat: f64, lon: f64) -> Outcome {
    let Some(me) = dir.lookup_mut(caller) else {
        return Outcome::Ignored;
    };
    me.lat = lat;
    me.lon = lon;
    dir.snapshot();
    Outcome::Applied
}

fn request_chat(dir: &mut Directory, caller: &ClientId, target: &ClientId) -> Outcome {
    if target == caller {
        return Outcome::Ignored;
    }
    let from_name = match dir.lookup(caller) {
        Some(me) if me.status != UserStatus::Chatting => me.name.clone(),
        _ => return Outcome::Ignored,
    };
    if !dir.lookup(target).is_some_and(|t| t.status == UserStatus::Idle) {
        return Outcome::Ignored;
    }

    if let Some(me) = dir.lookup_mut(caller) {
        me.status = UserStatus::Requesting;
        me.pending_target = Some(target.clone());
    }
    dir.send_to(
        target,
        &ServerMessage::ChatRequest {
            from_id: caller.clone(),
            from_name,
        },
    );
    dir.snapshot();
    Outcome::Applied
}

fn accept_chat(dir: &mut Directory, caller: &ClientId, requester: &ClientId) -> Outcome {
    if requester == caller {
        return Outcome::Ignored;
    }
    let my_name = match dir.lookup(caller) {
        Some(me) if me.status != UserStatus::Chatting => me.name.clone(),
        _ => return Outcome::Ignored,
    };
    let requester_name = match dir.lookup(requester) {
        Some(r) if r.status == UserStatus::Requesting => r.name.clone(),
        _ => return Outcome::Ignored,
    };

    dir.pair(caller, requester);
    dir.send_to(
        requester,
        &ServerMessage::ChatConnected {
            partner_id: caller.clone(),
            partner_name: my_name,
        },
    );
    dir.send_to(
        caller,
        &ServerMessage::ChatConnected {
            partner_id: requester.clone(),
            partner_name: requester_name,
        },
    );
    dir.snapshot();
    Outcome::Applied
}

/// A Chatting requester is left alone; an Idle one is still told.
fn decline_chat(dir: &mut Directory, requester: &ClientId) -> Outcome {
    match dir.lookup_mut(requester) {
        Some(r) if r.status == UserStatus::Chatting => return Outcome::Ignored,
        Some(r) => r.reset(),
        None => return Outcome::Ignored,
    }
    dir.send_to(requester, &ServerMessage::ChatDeclined);
    dir.snapshot();
    Outcome::Applied
}

fn cancel_request(dir: &mut Directory, caller: &ClientId, target: &ClientId) -> Outcome {
    match dir.lookup_mut(caller) {
        Some(me) if me.status != UserStatus::Chatting => me.reset(),
        _ => return Outcome::Ignored,
    }
    dir.send_to(target, &ServerMessage::RequestCancelled);
    dir.snapshot();
    Outcome::Applied
}

fn chat_msg(dir: &mut Directory, caller: &ClientId, content: String) -> Outcome {
    let Some(partner) = dir.lookup(caller).and_then(|me| me.partner_id.clone()) else {
        return Outcome::Ignored;
    };
    if dir.lookup(&partner).is_none() {
        return Outcome::Ignored;
    }
    dir.send_to(
        &partner,
        &ServerMessage::ChatMsg {
            content,
            from_id: caller.clone(),
        },
    );
    Outcome::Applied
}

fn end_chat(dir: &mut Directory, caller: &ClientId) -> Outcome {
    let Some((partner, my_name)) = dir
        .lookup(caller)
        .map(|me| (me.partner_id.clone(), me.name.clone()))
    else {
        return Outcome::Ignored;
    };

    if let Some(partner) = partner {
        if dir.release(&partner, caller) {
            dir.send_to(
                &partner,
                &ServerMessage::ChatEnded {
                    message: format!("{my_name} left the chat"),
                },
            );
        }
    }
    if let Some(me) = dir.lookup_mut(caller) {
        me.reset();
    }
    dir.send_to(
        caller,
        &ServerMessage::ChatEnded {
            message: CHAT_ENDED.into(),
        },
    );
    dir.snapshot();
    Outcome::Applied
}
