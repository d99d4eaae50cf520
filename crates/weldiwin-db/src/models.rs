/// Database row types. Rows carry everything the store knows, including
/// credentials; the `to_*` conversions produce the public shapes.
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

use weldiwin_types::access::{ChildRef, RoomRef};
use weldiwin_types::models::{
    AccountSummary, Attributes, AudioDescriptor, Child, ChildStatus, LastMessage, Location,
    Message, MessageType, Role, Sender, User, UserStatus, VerificationChannel,
};

pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
    pub role: Role,
    pub status: UserStatus,
    pub avatar_url: Option<String>,
    pub is_verified: bool,
    pub verification_code: Option<String>,
    pub verification_expires_at: Option<DateTime<Utc>>,
    pub verification_channel: Option<VerificationChannel>,
    pub reset_code: Option<String>,
    pub reset_expires_at: Option<DateTime<Utc>>,
    pub last_code_sent_at: Option<DateTime<Utc>>,
    pub google_id: Option<String>,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn to_user(&self) -> User {
        User {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            role: self.role,
            status: self.status,
            avatar_url: self.avatar_url.clone(),
            is_verified: self.is_verified,
            google_id: self.google_id.clone(),
            additional_attributes: self.attributes.clone(),
            created_at: self.created_at,
        }
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id,
            name: self.name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

pub struct NewUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
    pub avatar_url: Option<String>,
    pub is_verified: bool,
    pub google_id: Option<String>,
}

/// Field-level partial update. `None` leaves the column untouched.
#[derive(Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub avatar_url: Option<String>,
    pub is_verified: Option<bool>,
    pub attributes: Option<Attributes>,
}

pub struct ChildRow {
    pub id: Uuid,
    pub name: String,
    pub main_parent: Uuid,
    pub linked_parents: Vec<Uuid>,
    pub avatar_url: Option<String>,
    pub location: Option<Location>,
    pub device_info: Option<Value>,
    pub is_online: bool,
    pub status: ChildStatus,
    pub qr_code: Option<String>,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
}

impl ChildRow {
    pub fn to_child(&self) -> Child {
        Child {
            id: self.id,
            name: self.name.clone(),
            main_parent: self.main_parent,
            linked_parents: self.linked_parents.clone(),
            avatar_url: self.avatar_url.clone(),
            location: self.location,
            device_info: self.device_info.clone(),
            is_online: self.is_online,
            status: self.status,
            qr_code: self.qr_code.clone(),
            additional_attributes: self.attributes.clone(),
            created_at: self.created_at,
        }
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id,
            name: self.name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }

    pub fn access_ref(&self) -> ChildRef<'_> {
        ChildRef {
            id: self.id,
            main_parent: self.main_parent,
            linked_parents: &self.linked_parents,
        }
    }
}

pub struct NewChild {
    pub id: Uuid,
    pub name: String,
    pub main_parent: Uuid,
    pub avatar_url: Option<String>,
    pub device_info: Option<Value>,
    pub qr_code: String,
    pub attributes: Attributes,
}

#[derive(Default)]
pub struct ChildPatch {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub device_info: Option<Value>,
    pub is_online: Option<bool>,
    pub status: Option<ChildStatus>,
    pub attributes: Option<Attributes>,
}

#[derive(Debug)]
pub struct RoomRow {
    pub id: Uuid,
    pub parent_id: Uuid,
    pub child_id: Uuid,
    pub invited_parents: Vec<Uuid>,
    pub is_active: bool,
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
}

impl RoomRow {
    pub fn access_ref(&self) -> RoomRef<'_> {
        RoomRef {
            parent: self.parent_id,
            child: self.child_id,
            invited_parents: &self.invited_parents,
        }
    }
}

pub struct MessageRow {
    pub seq: i64,
    pub message: Message,
}

pub struct NewMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender: Sender,
    pub message_type: MessageType,
    pub text: Option<String>,
    pub audio: Option<AudioDescriptor>,
    pub signaling_payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

// -- Column codecs --

/// Canonical text form for timestamps (sortable RFC 3339, microsecond precision).
pub fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn json_text<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion(idx, e))
}

pub(crate) fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion(idx, e))).transpose()
}

pub(crate) fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion(idx, e))
}

pub(crate) fn opt_enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion(idx, e))).transpose()
}

pub(crate) fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

pub(crate) fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion(idx, e))
    })
    .transpose()
}

pub(crate) fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion(idx, e))
}

pub(crate) fn opt_json_col<T: DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s).map_err(|e| conversion(idx, e)))
        .transpose()
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> anyhow::Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> anyhow::Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
