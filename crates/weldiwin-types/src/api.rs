use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    ActorKind, Attributes, Child, ChildStatus, Role, SenderKind, SignalType, User, UserStatus,
    VerificationChannel,
};

/// Parses a record id taken from a path, body or socket frame. Malformed
/// ids are rejected before any lookup.
pub fn parse_id(raw: &str, field: &str) -> ServiceResult<Uuid> {
    raw.trim()
        .parse()
        .map_err(|_| ServiceError::invalid(format!("{field} must be a valid UUID")))
}

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "type")]
    pub kind: ActorKind,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
    pub role: Option<Role>,
    pub verification_channel: Option<VerificationChannel>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrLoginRequest {
    pub qr_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleLoginRequest {
    pub id_token: String,
}

/// Identifies an account by email or phone for the code-based flows.
#[derive(Debug, Default, Deserialize)]
pub struct AccountLookup {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(flatten)]
    pub account: AccountLookup,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    #[serde(flatten)]
    pub account: AccountLookup,
    pub channel: Option<VerificationChannel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(flatten)]
    pub account: AccountLookup,
    pub code: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAuthResponse {
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildAuthResponse {
    pub child: Child,
    pub access_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
    pub role: Role,
    pub avatar_url: Option<String>,
    pub status: Option<UserStatus>,
    #[serde(default)]
    pub is_verified: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub avatar_url: Option<String>,
    pub status: Option<UserStatus>,
    pub is_verified: Option<bool>,
    pub additional_attributes: Option<Attributes>,
}

// -- Children --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChildRequest {
    pub name: String,
    /// Only honored for admins; parents always create for themselves.
    pub parent_id: Option<Uuid>,
    pub avatar_url: Option<String>,
    pub device_info: Option<Value>,
    pub qr_code: Option<String>,
    pub additional_attributes: Option<Attributes>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChildRequest {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub device_info: Option<Value>,
    pub is_online: Option<bool>,
    pub status: Option<ChildStatus>,
    pub additional_attributes: Option<Attributes>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UpdateLocationRequest {
    pub lat: f64,
    pub lng: f64,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextRequest {
    pub text: String,
    pub sender_model: SenderKind,
    pub sender_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSignalRequest {
    #[serde(rename = "type")]
    pub kind: SignalType,
    pub sender_model: SenderKind,
    pub sender_id: String,
    pub payload: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub limit: Option<String>,
    pub before_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioSenderFilter {
    Parent,
    Child,
    Me,
    #[default]
    All,
}

#[derive(Debug, Default, Deserialize)]
pub struct AudioQuery {
    pub sender: Option<AudioSenderFilter>,
}
