use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use serde::Deserialize;
use tracing::warn;

use weldiwin_gateway::connection;

use crate::auth::AppState;
use crate::middleware::resolve_actor;

#[derive(Debug, Default, Deserialize)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

/// GET /gateway. The token comes from `?token=` or the Authorization header.
/// A bad or missing token still upgrades; the connection is then restricted.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer.ok().map(|TypedHeader(Authorization(b))| b.token().to_string()));

    let actor = match token {
        Some(token) => match resolve_actor(&state, &token).await {
            Ok(actor) => Some(actor),
            Err(e) => {
                warn!("Gateway handshake token rejected: {}", e);
                None
            }
        },
        None => None,
    };

    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway, actor))
}
