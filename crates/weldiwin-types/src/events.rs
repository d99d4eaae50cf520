use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ErrorBody;
use crate::models::{Actor, Message, SenderKind, SignalType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Joined,
    Left,
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// First frame on every connection. `actor` is `None` when the handshake
    /// token was missing or invalid; the socket stays open but restricted.
    Ready { actor: Option<Actor> },

    /// Someone subscribed to or left a room group.
    #[serde(rename_all = "camelCase")]
    Presence {
        user_id: Uuid,
        state: PresenceState,
        room_id: Uuid,
    },

    /// A text message was appended to a room.
    NewMessage(Message),

    /// A call-signaling message, relayed to everyone in the room but its sender.
    Signal(Message),

    /// Inline reply to a command. Handler failures land here and never close
    /// the connection.
    Ack {
        command: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
}

impl GatewayEvent {
    /// Returns the room this event is scoped to, if any.
    pub fn room_id(&self) -> Option<Uuid> {
        match self {
            Self::Presence { room_id, .. } => Some(*room_id),
            Self::NewMessage(msg) | Self::Signal(msg) => Some(msg.room_id),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayCommand {
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String },

    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: String },

    #[serde(rename_all = "camelCase")]
    SendText {
        room_id: String,
        text: String,
        sender_model: SenderKind,
        sender_id: String,
    },

    #[serde(rename_all = "camelCase")]
    Signal {
        room_id: String,
        sender_model: SenderKind,
        sender_id: String,
        #[serde(rename = "type")]
        kind: SignalType,
        payload: Value,
    },
}

impl GatewayCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "joinRoom",
            Self::LeaveRoom { .. } => "leaveRoom",
            Self::SendText { .. } => "sendText",
            Self::Signal { .. } => "signal",
        }
    }
}
