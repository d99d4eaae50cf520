use anyhow::Result;
use rusqlite::{Row, params};
use uuid::Uuid;

use weldiwin_types::models::{Message, MessageType, SenderKind};

use crate::Database;
use crate::models::{
    MessageRow, NewMessage, OptionalExt, enum_col, json_text, opt_json_col, time_col, ts, uuid_col,
};

/// Preview text stored for audio messages in place of the recording.
pub const AUDIO_PREVIEW: &str = "[Audio]";

const MESSAGE_COLUMNS: &str = "seq, id, room_id, sender_model, sender_id, type, text, audio, \
     signaling_payload, is_delivered, is_read, created_at";

impl Database {
    /// Appends a message and, for conversation messages, refreshes the room
    /// preview in the same transaction. Signaling leaves the preview alone.
    pub fn insert_message(&self, msg: &NewMessage) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, room_id, sender_model, sender_id, type, text, audio, \
                 signaling_payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    msg.id.to_string(),
                    msg.room_id.to_string(),
                    msg.sender.kind.as_str(),
                    msg.sender.id.to_string(),
                    msg.message_type.as_str(),
                    msg.text,
                    msg.audio.as_ref().map(json_text),
                    msg.signaling_payload.as_ref().map(json_text),
                    ts(&msg.created_at),
                ],
            )?;
            let seq = tx.last_insert_rowid();

            if let Some(preview) = preview_text(msg) {
                tx.execute(
                    "UPDATE rooms SET last_text = ?2, last_type = ?3, last_sender_model = ?4, \
                     last_sender_id = ?5, last_at = ?6 WHERE id = ?1",
                    params![
                        msg.room_id.to_string(),
                        preview,
                        msg.message_type.as_str(),
                        msg.sender.kind.as_str(),
                        msg.sender.id.to_string(),
                        ts(&msg.created_at),
                    ],
                )?;
            }
            tx.commit()?;

            Ok(MessageRow {
                seq,
                message: Message {
                    id: msg.id,
                    room_id: msg.room_id,
                    sender: msg.sender,
                    message_type: msg.message_type,
                    text: msg.text.clone(),
                    audio: msg.audio.clone(),
                    signaling_payload: msg.signaling_payload.clone(),
                    is_delivered: false,
                    is_read: false,
                    created_at: msg.created_at,
                },
            })
        })
    }

    /// Position of a message inside a room's log, if it belongs to that room.
    pub fn message_seq(&self, room_id: Uuid, message_id: Uuid) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT seq FROM messages WHERE room_id = ?1 AND id = ?2",
                [room_id.to_string(), message_id.to_string()],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Newest first. `before_seq` is exclusive.
    pub fn list_messages(
        &self,
        room_id: Uuid,
        limit: u32,
        before_seq: Option<i64>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE room_id = ?1 AND (?2 IS NULL OR seq < ?2) \
                 ORDER BY seq DESC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![room_id.to_string(), before_seq, limit],
                    message_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Audio messages, newest first, optionally narrowed to one sender side
    /// or to one exact sender.
    pub fn list_audio(
        &self,
        room_id: Uuid,
        kind: Option<SenderKind>,
        sender_id: Option<Uuid>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE room_id = ?1 AND type = ?2 \
                   AND (?3 IS NULL OR sender_model = ?3) \
                   AND (?4 IS NULL OR sender_id = ?4) \
                 ORDER BY seq DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![
                        room_id.to_string(),
                        MessageType::Audio.as_str(),
                        kind.map(|k| k.as_str()),
                        sender_id.map(|id| id.to_string()),
                    ],
                    message_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn preview_text(msg: &NewMessage) -> Option<String> {
    match msg.message_type {
        MessageType::Text => Some(msg.text.clone().unwrap_or_default()),
        MessageType::Audio => Some(AUDIO_PREVIEW.to_string()),
        _ => None,
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        message: Message {
            id: uuid_col(row, 1)?,
            room_id: uuid_col(row, 2)?,
            sender: weldiwin_types::models::Sender {
                kind: enum_col(row, 3)?,
                id: uuid_col(row, 4)?,
            },
            message_type: enum_col(row, 5)?,
            text: row.get(6)?,
            audio: opt_json_col(row, 7)?,
            signaling_payload: opt_json_col(row, 8)?,
            is_delivered: row.get(9)?,
            is_read: row.get(10)?,
            created_at: time_col(row, 11)?,
        },
    })
}
