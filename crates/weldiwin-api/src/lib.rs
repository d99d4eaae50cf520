pub mod auth;
pub mod children;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod messages;
pub mod middleware;
pub mod notify;
pub mod oauth;
pub mod uploads;
pub mod users;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, patch, post},
};
use serde_json::{Value, json};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// Multipart framing on top of the largest accepted audio file.
const AUDIO_BODY_LIMIT: usize = uploads::MAX_AUDIO_SIZE + 1024 * 1024;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Every REST route plus the gateway upgrade. Cross-cutting layers (CORS,
/// tracing) are added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/login/qr", post(auth::login_qr))
        .route("/auth/login/google", post(auth::login_google))
        .route("/auth/verify", post(auth::verify))
        .route("/auth/resend-code", post(auth::resend_code))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/gateway", get(gateway::ws_upgrade))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users", post(users::create_user).get(users::list_users))
        .route("/users/profile", get(users::profile))
        .route(
            "/users/{id}",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route(
            "/children",
            post(children::create_child).get(children::list_children),
        )
        .route("/children/profile", get(children::profile))
        .route("/children/parent/{parent_id}", get(children::children_of_parent))
        .route(
            "/children/{id}",
            get(children::get_child)
                .patch(children::update_child)
                .delete(children::delete_child),
        )
        .route("/children/{id}/location", patch(children::update_location))
        .route(
            "/children/{id}/parents/{parent_id}",
            post(children::link_parent).delete(children::unlink_parent),
        )
        .route("/messages/rooms/parent/{parent_id}", get(messages::rooms_for_parent))
        .route("/messages/room/child/{child_id}", get(messages::room_for_child))
        .route("/messages/room/{room_id}", get(messages::get_room))
        .route("/messages/room/{room_id}/messages", get(messages::list_messages))
        .route("/messages/room/{room_id}/text", post(messages::send_text))
        .route(
            "/messages/room/{room_id}/audio",
            get(messages::list_audio)
                .post(messages::send_audio)
                .layer(DefaultBodyLimit::max(AUDIO_BODY_LIMIT)),
        )
        .route("/messages/room/{room_id}/signal", post(messages::send_signal))
        .route(
            "/messages/room/{room_id}/invite/{parent_id}",
            post(messages::invite_parent).delete(messages::remove_invited_parent),
        )
        .layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
