use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use weldiwin_types::api::Claims;
use weldiwin_types::models::{Actor, ActorKind, ChildStatus, UserStatus};
use weldiwin_types::{ServiceError, ServiceResult};

use crate::auth::{AppState, AppStateInner};
use crate::error::ApiError;

/// Turns a bearer token into the actor descriptor. The account is re-loaded
/// so that deleted or deactivated accounts lose access immediately.
pub async fn resolve_actor(state: &AppStateInner, token: &str) -> ServiceResult<Actor> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("Rejected token: {}", e);
        ServiceError::unauthorized("Invalid or expired token")
    })?
    .claims;

    match claims.kind {
        ActorKind::User => {
            let row = state
                .services
                .accounts
                .find_by_id(claims.sub)
                .await?
                .ok_or_else(|| ServiceError::unauthorized("Account no longer exists"))?;
            if row.status != UserStatus::Active {
                return Err(ServiceError::unauthorized("User account is inactive"));
            }
            Ok(Actor::user(row.id, row.role))
        }
        ActorKind::Child => {
            let row = state
                .services
                .children
                .find_by_id(claims.sub)
                .await?
                .ok_or_else(|| ServiceError::unauthorized("Account no longer exists"))?;
            if row.status != ChildStatus::Active {
                return Err(ServiceError::unauthorized("Child account is inactive"));
            }
            Ok(Actor::child(row.id, row.main_parent))
        }
    }
}

/// Extract and validate the JWT from the Authorization header, then expose
/// the actor to handlers as an `Extension<Actor>`.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) =
        bearer.map_err(|_| ServiceError::unauthorized("Missing bearer token"))?;

    let actor = resolve_actor(&state, bearer.token()).await?;
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}
