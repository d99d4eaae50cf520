use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use tracing::{info, warn};

use weldiwin_core::messages::page_limit;
use weldiwin_types::api::{AudioQuery, MessageQuery, SendSignalRequest, SendTextRequest, parse_id};
use weldiwin_types::models::{
    Actor, AudioDescriptor, Message, MessagePayload, Room, Sender, SenderKind,
};
use weldiwin_types::{ServiceError, ServiceResult};

use crate::auth::AppState;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiQuery};
use crate::uploads::{AudioUpload, MAX_AUDIO_SIZE};

fn sender_from(model: SenderKind, raw_id: &str) -> ServiceResult<Sender> {
    Ok(Sender {
        kind: model,
        id: parse_id(raw_id, "senderId")?,
    })
}

// -- Rooms --

pub async fn rooms_for_parent(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(parent_id): Path<String>,
) -> ApiResult<Json<Vec<Room>>> {
    let parent_id = parse_id(&parent_id, "parentId")?;
    Ok(Json(
        state
            .services
            .rooms
            .list_for_parent(&actor, parent_id)
            .await?,
    ))
}

pub async fn room_for_child(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(child_id): Path<String>,
) -> ApiResult<Json<Room>> {
    let child_id = parse_id(&child_id, "childId")?;
    Ok(Json(state.services.rooms.for_child(&actor, child_id).await?))
}

pub async fn get_room(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(room_id): Path<String>,
) -> ApiResult<Json<Room>> {
    let room_id = parse_id(&room_id, "roomId")?;
    Ok(Json(state.services.rooms.get(&actor, room_id).await?))
}

pub async fn invite_parent(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((room_id, parent_id)): Path<(String, String)>,
) -> ApiResult<Json<Room>> {
    let room_id = parse_id(&room_id, "roomId")?;
    let parent_id = parse_id(&parent_id, "parentId")?;
    Ok(Json(
        state
            .services
            .rooms
            .invite_parent(&actor, room_id, parent_id)
            .await?,
    ))
}

pub async fn remove_invited_parent(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((room_id, parent_id)): Path<(String, String)>,
) -> ApiResult<Json<Room>> {
    let room_id = parse_id(&room_id, "roomId")?;
    let parent_id = parse_id(&parent_id, "parentId")?;
    Ok(Json(
        state
            .gateway
            .remove_invited_parent(&actor, room_id, parent_id)
            .await?,
    ))
}

// -- Messages --

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(room_id): Path<String>,
    ApiQuery(query): ApiQuery<MessageQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let room_id = parse_id(&room_id, "roomId")?;
    let before_id = query
        .before_id
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| parse_id(raw, "beforeId"))
        .transpose()?;
    let limit = page_limit(query.limit.as_deref());

    Ok(Json(
        state
            .services
            .messages
            .list(&actor, room_id, limit, before_id)
            .await?,
    ))
}

pub async fn list_audio(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(room_id): Path<String>,
    ApiQuery(query): ApiQuery<AudioQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let room_id = parse_id(&room_id, "roomId")?;
    Ok(Json(
        state
            .services
            .messages
            .list_audio(&actor, room_id, query.sender.unwrap_or_default())
            .await?,
    ))
}

/// Appends a text message and pushes it to the room's live subscribers.
pub async fn send_text(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(room_id): Path<String>,
    ApiJson(req): ApiJson<SendTextRequest>,
) -> ApiResult<impl IntoResponse> {
    let room_id = parse_id(&room_id, "roomId")?;
    let sender = sender_from(req.sender_model, &req.sender_id)?;

    let message = state
        .services
        .messages
        .append(&actor, room_id, sender, MessagePayload::Text(req.text))
        .await?;
    state.gateway.publish(&message).await;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn send_signal(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(room_id): Path<String>,
    ApiJson(req): ApiJson<SendSignalRequest>,
) -> ApiResult<impl IntoResponse> {
    let room_id = parse_id(&room_id, "roomId")?;
    let sender = sender_from(req.sender_model, &req.sender_id)?;

    let payload = MessagePayload::Signal {
        kind: req.kind,
        payload: req.payload,
    };
    let message = state
        .services
        .messages
        .append(&actor, room_id, sender, payload)
        .await?;
    state.gateway.publish(&message).await;
    Ok((StatusCode::CREATED, Json(message)))
}

struct AudioForm {
    file: Option<(Bytes, String)>,
    sender_model: Option<String>,
    sender_id: Option<String>,
    duration_sec: Option<f64>,
}

async fn read_audio_form(mut multipart: Multipart) -> ServiceResult<AudioForm> {
    let mut form = AudioForm {
        file: None,
        sender_model: None,
        sender_id: None,
        duration_sec: None,
    };
    let bad_form = |e: axum::extract::multipart::MultipartError| {
        ServiceError::invalid(format!("invalid multipart body: {e}"))
    };

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        match field.name().unwrap_or_default() {
            "file" => {
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(bad_form)?;
                form.file = Some((bytes, mime));
            }
            "senderModel" => form.sender_model = Some(field.text().await.map_err(bad_form)?),
            "senderId" => form.sender_id = Some(field.text().await.map_err(bad_form)?),
            "durationSec" => {
                let raw = field.text().await.map_err(bad_form)?;
                form.duration_sec = raw.trim().parse::<f64>().ok().filter(|d| d.is_finite());
            }
            other => warn!("Ignoring unexpected multipart field '{}'", other),
        }
    }
    Ok(form)
}

/// Multipart voice message: `file`, `senderModel`, `senderId`, optional
/// `durationSec`. Access is checked before anything is uploaded.
pub async fn send_audio(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(room_id): Path<String>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let room_id = parse_id(&room_id, "roomId")?;
    let form = read_audio_form(multipart).await?;

    let (bytes, mime_type) = form
        .file
        .filter(|(bytes, _)| !bytes.is_empty())
        .ok_or_else(|| ServiceError::invalid("file is required"))?;
    if bytes.len() > MAX_AUDIO_SIZE {
        return Err(ServiceError::invalid("file exceeds the 20 MB limit").into());
    }
    let sender_model: SenderKind = form
        .sender_model
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| ServiceError::invalid("senderModel must be \"User\" or \"Child\""))?;
    let sender = sender_from(sender_model, form.sender_id.as_deref().unwrap_or_default())?;

    state
        .services
        .messages
        .authorize_post(&actor, room_id, &sender)
        .await?;

    let size_bytes = bytes.len() as u64;
    let stored = state
        .uploader
        .upload(AudioUpload {
            room_id,
            bytes,
            mime_type: mime_type.clone(),
        })
        .await
        .map_err(|e| ServiceError::Unavailable(format!("Failed to upload audio: {e}")))?;
    info!("Stored {} bytes of audio for room {}", size_bytes, room_id);

    let audio = AudioDescriptor {
        url: stored.url,
        duration_sec: form.duration_sec,
        mime_type: Some(mime_type),
        size_bytes: Some(size_bytes),
        external_ref: stored.external_ref,
    };
    let message = state
        .services
        .messages
        .append(&actor, room_id, sender, MessagePayload::Audio(audio))
        .await?;
    state.gateway.publish(&message).await;
    Ok((StatusCode::CREATED, Json(message)))
}
