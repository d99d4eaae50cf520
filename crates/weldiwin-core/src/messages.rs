//! Append-only message log, one per room.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use weldiwin_db::models::NewMessage;
use weldiwin_types::access;
use weldiwin_types::api::AudioSenderFilter;
use weldiwin_types::models::{Actor, Message, MessagePayload, Sender, SenderKind};
use weldiwin_types::{ServiceError, ServiceResult};

use crate::rooms::Rooms;
use crate::store::Store;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page size from a raw query value. Anything unparsable or non-positive
/// falls back to the default; large values are capped.
pub fn page_limit(raw: Option<&str>) -> u32 {
    match raw.and_then(|s| s.trim().parse::<i64>().ok()) {
        Some(n) if n > 0 => n.min(MAX_PAGE_SIZE as i64) as u32,
        _ => DEFAULT_PAGE_SIZE,
    }
}

#[derive(Clone)]
pub struct Messages {
    store: Store,
    rooms: Rooms,
}

impl Messages {
    pub fn new(store: Store, rooms: Rooms) -> Self {
        Self { store, rooms }
    }

    /// The posting checks alone, for callers that must do expensive work
    /// (uploads) before they can append.
    pub async fn authorize_post(
        &self,
        actor: &Actor,
        room_id: Uuid,
        sender: &Sender,
    ) -> ServiceResult<()> {
        let room = self.rooms.load(room_id).await?;
        access::post_to_room(actor, &room.access_ref())?;
        access::legitimate_sender(&room.access_ref(), sender)
    }

    /// Checks the caller may post into the room and that the declared sender
    /// is a current participant, then appends.
    pub async fn append(
        &self,
        actor: &Actor,
        room_id: Uuid,
        sender: Sender,
        payload: MessagePayload,
    ) -> ServiceResult<Message> {
        self.authorize_post(actor, room_id, &sender).await?;

        let message_type = payload.message_type();
        let (text, audio, signaling_payload) = match payload {
            MessagePayload::Text(text) => {
                if text.trim().is_empty() {
                    return Err(ServiceError::invalid("text is required"));
                }
                (Some(text), None, None)
            }
            MessagePayload::Audio(audio) => (None, Some(audio), None),
            MessagePayload::Signal { payload, .. } => (None, None, Some(payload)),
        };

        let msg = NewMessage {
            id: Uuid::new_v4(),
            room_id,
            sender,
            message_type,
            text,
            audio,
            signaling_payload,
            created_at: Utc::now(),
        };
        let row = self
            .store
            .write("append message", move |db| db.insert_message(&msg))
            .await?;
        debug!(
            "Message {} ({}) appended to room {}",
            row.message.id,
            message_type.as_str(),
            room_id
        );
        Ok(row.message)
    }

    /// Newest first. `before_id` is an exclusive cursor and must name a
    /// message of this room.
    pub async fn list(
        &self,
        actor: &Actor,
        room_id: Uuid,
        limit: u32,
        before_id: Option<Uuid>,
    ) -> ServiceResult<Vec<Message>> {
        let room = self.rooms.load(room_id).await?;
        access::read_room(actor, &room.access_ref())?;

        let before_seq = match before_id {
            Some(id) => Some(
                self.store
                    .read("resolve cursor", move |db| db.message_seq(room_id, id))
                    .await?
                    .ok_or_else(|| ServiceError::not_found("Cursor message not found"))?,
            ),
            None => None,
        };

        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let rows = self
            .store
            .read("list messages", move |db| db.list_messages(room_id, limit, before_seq))
            .await?;
        Ok(rows.into_iter().map(|row| row.message).collect())
    }

    pub async fn list_audio(
        &self,
        actor: &Actor,
        room_id: Uuid,
        filter: AudioSenderFilter,
    ) -> ServiceResult<Vec<Message>> {
        let room = self.rooms.load(room_id).await?;
        access::read_room(actor, &room.access_ref())?;

        let (kind, sender_id) = match filter {
            AudioSenderFilter::Parent => (Some(SenderKind::ParentSide), None),
            AudioSenderFilter::Child => (Some(SenderKind::ChildSide), None),
            AudioSenderFilter::Me => (Some(actor.sender_kind()), Some(actor.id)),
            AudioSenderFilter::All => (None, None),
        };
        let rows = self
            .store
            .read("list audio", move |db| db.list_audio(room_id, kind, sender_id))
            .await?;
        Ok(rows.into_iter().map(|row| row.message).collect())
    }
}
