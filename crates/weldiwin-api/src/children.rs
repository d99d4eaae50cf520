use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use weldiwin_core::ChildDraft;
use weldiwin_db::models::ChildPatch;
use weldiwin_types::api::{
    CreateChildRequest, MessageResponse, UpdateChildRequest, UpdateLocationRequest, parse_id,
};
use weldiwin_types::models::{Actor, Child};

use crate::auth::AppState;
use crate::error::ApiResult;
use crate::extract::ApiJson;

pub async fn create_child(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ApiJson(req): ApiJson<CreateChildRequest>,
) -> ApiResult<impl IntoResponse> {
    let draft = ChildDraft {
        name: req.name,
        parent_id: req.parent_id,
        avatar_url: req.avatar_url,
        device_info: req.device_info,
        qr_code: req.qr_code.filter(|code| !code.trim().is_empty()),
        attributes: req.additional_attributes.unwrap_or_default(),
    };
    let child = state.services.children.create(&actor, draft).await?;
    Ok((StatusCode::CREATED, Json(child)))
}

pub async fn list_children(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<Child>>> {
    Ok(Json(state.services.children.list(&actor).await?))
}

pub async fn profile(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Child>> {
    Ok(Json(state.services.children.profile(&actor).await?))
}

pub async fn children_of_parent(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(parent_id): Path<String>,
) -> ApiResult<Json<Vec<Child>>> {
    let parent_id = parse_id(&parent_id, "parentId")?;
    Ok(Json(
        state
            .services
            .children
            .list_for_parent(&actor, parent_id)
            .await?,
    ))
}

pub async fn get_child(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(child_id): Path<String>,
) -> ApiResult<Json<Child>> {
    let child_id = parse_id(&child_id, "id")?;
    Ok(Json(state.services.children.get(&actor, child_id).await?))
}

pub async fn update_child(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(child_id): Path<String>,
    ApiJson(req): ApiJson<UpdateChildRequest>,
) -> ApiResult<Json<Child>> {
    let child_id = parse_id(&child_id, "id")?;
    let patch = ChildPatch {
        name: req.name,
        avatar_url: req.avatar_url,
        device_info: req.device_info,
        is_online: req.is_online,
        status: req.status,
        attributes: req.additional_attributes,
    };
    Ok(Json(
        state
            .services
            .children
            .update(&actor, child_id, patch)
            .await?,
    ))
}

pub async fn update_location(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(child_id): Path<String>,
    ApiJson(req): ApiJson<UpdateLocationRequest>,
) -> ApiResult<Json<Child>> {
    let child_id = parse_id(&child_id, "id")?;
    Ok(Json(
        state
            .services
            .children
            .update_location(&actor, child_id, req.lat, req.lng)
            .await?,
    ))
}

pub async fn delete_child(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(child_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let child_id = parse_id(&child_id, "id")?;
    state.gateway.delete_child(&actor, child_id).await?;
    Ok(Json(MessageResponse {
        message: "Child deleted successfully".into(),
    }))
}

pub async fn link_parent(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((child_id, parent_id)): Path<(String, String)>,
) -> ApiResult<Json<Child>> {
    let child_id = parse_id(&child_id, "id")?;
    let parent_id = parse_id(&parent_id, "parentId")?;
    Ok(Json(
        state
            .services
            .children
            .link_parent(&actor, child_id, parent_id)
            .await?,
    ))
}

pub async fn unlink_parent(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((child_id, parent_id)): Path<(String, String)>,
) -> ApiResult<Json<Child>> {
    let child_id = parse_id(&child_id, "id")?;
    let parent_id = parse_id(&parent_id, "parentId")?;
    Ok(Json(
        state
            .services
            .children
            .unlink_parent(&actor, child_id, parent_id)
            .await?,
    ))
}
