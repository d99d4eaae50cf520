use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use weldiwin_db::models::{NewUser, UserPatch};
use weldiwin_types::api::{CreateUserRequest, MessageResponse, UpdateUserRequest, parse_id};
use weldiwin_types::models::{Actor, User, UserStatus};

use crate::auth::{AppState, hash_password, validate_email, validate_name, validate_password};
use crate::error::ApiResult;
use crate::extract::ApiJson;

pub async fn create_user(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ApiJson(req): ApiJson<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_name(&req.name)?;
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    let user = state
        .services
        .accounts
        .create_user(
            &actor,
            NewUser {
                id: Uuid::new_v4(),
                name: req.name.trim().to_string(),
                email: req.email,
                phone: req.phone,
                password_hash: hash_password(&req.password)?,
                role: req.role,
                status: req.status.unwrap_or(UserStatus::Active),
                avatar_url: req.avatar_url,
                is_verified: req.is_verified,
                google_id: None,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.services.accounts.list_users(&actor).await?))
}

pub async fn profile(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.services.accounts.get_user(&actor, actor.id).await?))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<User>> {
    let user_id = parse_id(&user_id, "id")?;
    Ok(Json(state.services.accounts.get_user(&actor, user_id).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(user_id): Path<String>,
    ApiJson(req): ApiJson<UpdateUserRequest>,
) -> ApiResult<Json<User>> {
    let user_id = parse_id(&user_id, "id")?;
    let password_hash = match req.password.as_deref() {
        Some(password) => {
            validate_password(password)?;
            Some(hash_password(password)?)
        }
        None => None,
    };
    if let Some(name) = req.name.as_deref() {
        validate_name(name)?;
    }
    if let Some(email) = req.email.as_deref() {
        validate_email(email)?;
    }

    let patch = UserPatch {
        name: req.name.map(|n| n.trim().to_string()),
        email: req.email,
        phone: req.phone,
        password_hash,
        role: req.role,
        status: req.status,
        avatar_url: req.avatar_url,
        is_verified: req.is_verified,
        attributes: req.additional_attributes,
    };
    Ok(Json(
        state
            .services
            .accounts
            .update_user(&actor, user_id, patch)
            .await?,
    ))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let user_id = parse_id(&user_id, "id")?;
    state.gateway.delete_user(&actor, user_id).await?;
    Ok(Json(MessageResponse {
        message: "User deleted successfully".into(),
    }))
}
