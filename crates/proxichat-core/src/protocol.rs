//! JSON wire protocol.
//!
//! Every frame is an object carrying a `type` discriminator. Inbound
//! decoding is lenient per field: a field with the wrong JSON type reads as
//! its zero value (empty string, `0.0`) instead of failing the message. An
//! unknown `type` or a payload that is not a JSON object fails the decode.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::ProtocolError;
use crate::ids::ClientId;
use crate::status::UserStatus;

/// Encoded server frame, shared between every queue it is fanned out to.
pub type Payload = Arc<str>;

/// Message received from a client.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Login {
        #[serde(default, deserialize_with = "or_default")]
        name: String,
        #[serde(default, deserialize_with = "or_default")]
        lat: Option<f64>,
        #[serde(default, deserialize_with = "or_default")]
        lon: Option<f64>,
    },
    UpdateLocation {
        #[serde(default, deserialize_with = "or_default")]
        lat: f64,
        #[serde(default, deserialize_with = "or_default")]
        lon: f64,
    },
    RequestChat {
        #[serde(rename = "targetId", default, deserialize_with = "or_default")]
        target_id: ClientId,
    },
    AcceptChat {
        #[serde(rename = "requesterId", default, deserialize_with = "or_default")]
        requester_id: ClientId,
    },
    DeclineChat {
        #[serde(rename = "requesterId", default, deserialize_with = "or_default")]
        requester_id: ClientId,
    },
    CancelRequest {
        #[serde(rename = "targetId", default, deserialize_with = "or_default")]
        target_id: ClientId,
    },
    ChatMsg {
        #[serde(default, deserialize_with = "or_default")]
        content: String,
    },
    EndChat {},
}

impl ClientEvent {
    /// Decode one inbound frame.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(payload).map_err(ProtocolError::Malformed)
    }

    /// Wire `type` of this event, used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::UpdateLocation { .. } => "update_location",
            Self::RequestChat { .. } => "request_chat",
            Self::AcceptChat { .. } => "accept_chat",
            Self::DeclineChat { .. } => "decline_chat",
            Self::CancelRequest { .. } => "cancel_request",
            Self::ChatMsg { .. } => "chat_msg",
            Self::EndChat {} => "end_chat",
        }
    }
}

/// Read any JSON value, falling back to `T::default()` when it does not fit.
fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// One user's entry in a presence snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserView {
    pub id: ClientId,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub status: UserStatus,
    /// Empty string when the user has no partner.
    #[serde(rename = "partnerId")]
    pub partner_id: String,
}

/// Message sent to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    WorldState {
        users: Vec<UserView>,
    },
    #[serde(rename_all = "camelCase")]
    ChatRequest {
        from_id: ClientId,
        from_name: String,
    },
    #[serde(rename_all = "camelCase")]
    ChatConnected {
        partner_id: ClientId,
        partner_name: String,
    },
    ChatDeclined,
    RequestCancelled,
    #[serde(rename_all = "camelCase")]
    ChatMsg {
        content: String,
        from_id: ClientId,
    },
    ChatEnded {
        message: String,
    },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Payload, ProtocolError> {
        let json = serde_json::to_string(self).map_err(ProtocolError::Encode)?;
        Ok(Arc::from(json))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::WorldState { .. } => "world_state",
            Self::ChatRequest { .. } => "chat_request",
            Self::ChatConnected { .. } => "chat_connected",
            Self::ChatDeclined => "chat_declined",
            Self::RequestCancelled => "request_cancelled",
            Self::ChatMsg { .. } => "chat_msg",
            Self::ChatEnded { .. } => "chat_ended",
        }
    }
}
