use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ServiceError;

/// Open key-value bag carried by accounts. Never consulted by access checks.
pub type Attributes = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Parent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChildStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationChannel {
    Email,
    Sms,
}

/// Which side of a parent-child pair a message came from.
/// On the wire this is the `senderModel` field (`"User"` / `"Child"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SenderKind {
    #[serde(rename = "User")]
    ParentSide,
    #[serde(rename = "Child")]
    ChildSide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    Audio,
    CallOffer,
    CallAnswer,
    IceCandidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    CallOffer,
    CallAnswer,
    IceCandidate,
}

macro_rules! str_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $ty {
            type Err = ServiceError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ServiceError::InvalidInput(format!(
                        "invalid {} value '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

str_enum!(Role { Admin => "ADMIN", Parent => "PARENT" });
str_enum!(UserStatus { Active => "ACTIVE", Inactive => "INACTIVE", Suspended => "SUSPENDED" });
str_enum!(ChildStatus { Active => "ACTIVE", Inactive => "INACTIVE" });
str_enum!(VerificationChannel { Email => "email", Sms => "sms" });
str_enum!(SenderKind { ParentSide => "User", ChildSide => "Child" });
str_enum!(MessageType {
    Text => "TEXT",
    Audio => "AUDIO",
    CallOffer => "CALL_OFFER",
    CallAnswer => "CALL_ANSWER",
    IceCandidate => "ICE_CANDIDATE",
});

impl MessageType {
    /// Signaling messages are logged but never shown as a conversation preview.
    pub fn is_signal(&self) -> bool {
        matches!(self, Self::CallOffer | Self::CallAnswer | Self::IceCandidate)
    }
}

impl From<SignalType> for MessageType {
    fn from(kind: SignalType) -> Self {
        match kind {
            SignalType::CallOffer => Self::CallOffer,
            SignalType::CallAnswer => Self::CallAnswer,
            SignalType::IceCandidate => Self::IceCandidate,
        }
    }
}

// -- Actor --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    User,
    Child,
}

/// The authenticated identity behind a request or gateway connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "type")]
    pub kind: ActorKind,
    /// Main parent of a child actor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
}

impl Actor {
    pub fn user(id: Uuid, role: Role) -> Self {
        Self {
            id,
            role: Some(role),
            kind: ActorKind::User,
            parent_id: None,
        }
    }

    pub fn child(id: Uuid, parent_id: Uuid) -> Self {
        Self {
            id,
            role: None,
            kind: ActorKind::Child,
            parent_id: Some(parent_id),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.kind == ActorKind::User && self.role == Some(Role::Admin)
    }

    pub fn is_parent(&self) -> bool {
        self.kind == ActorKind::User && self.role == Some(Role::Parent)
    }

    pub fn is_child(&self) -> bool {
        self.kind == ActorKind::Child
    }

    /// The sender side this actor posts as.
    pub fn sender_kind(&self) -> SenderKind {
        match self.kind {
            ActorKind::User => SenderKind::ParentSide,
            ActorKind::Child => SenderKind::ChildSide,
        }
    }
}

// -- Accounts --

/// Public view of a User. Credentials and pending codes never leave the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub avatar_url: Option<String>,
    pub is_verified: bool,
    pub google_id: Option<String>,
    pub additional_attributes: Attributes,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Child {
    pub id: Uuid,
    pub name: String,
    pub main_parent: Uuid,
    pub linked_parents: Vec<Uuid>,
    pub avatar_url: Option<String>,
    pub location: Option<Location>,
    pub device_info: Option<Value>,
    pub is_online: bool,
    pub status: ChildStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    pub additional_attributes: Attributes,
    pub created_at: DateTime<Utc>,
}

/// Name/avatar projection used when a room resolves its participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: Uuid,
    pub name: String,
    pub avatar_url: Option<String>,
}

// -- Rooms & messages --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    #[serde(rename = "senderModel")]
    pub kind: SenderKind,
    #[serde(rename = "senderId")]
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub text: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(flatten)]
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Uuid,
    pub parent: AccountSummary,
    pub child: AccountSummary,
    pub invited_parents: Vec<AccountSummary>,
    pub is_active: bool,
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDescriptor {
    pub url: String,
    pub duration_sec: Option<f64>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<u64>,
    pub external_ref: Option<String>,
}

/// Typed body of a message about to be appended to a room's log.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    Text(String),
    Audio(AudioDescriptor),
    Signal { kind: SignalType, payload: Value },
}

impl MessagePayload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Text(_) => MessageType::Text,
            Self::Audio(_) => MessageType::Audio,
            Self::Signal { kind, .. } => (*kind).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    #[serde(flatten)]
    pub sender: Sender,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub text: Option<String>,
    pub audio: Option<AudioDescriptor>,
    pub signaling_payload: Option<Value>,
    pub is_delivered: bool,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
