use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use weldiwin_core::Services;
use weldiwin_db::models::{NewUser, UserPatch, UserRow};
use weldiwin_gateway::Gateway;
use weldiwin_types::api::{
    AccountLookup, ChildAuthResponse, Claims, CodeRequest, GoogleLoginRequest, LoginRequest,
    MessageResponse, QrLoginRequest, RegisterRequest, ResetPasswordRequest, UserAuthResponse,
    VerifyRequest,
};
use weldiwin_types::models::{Actor, ChildStatus, Role, UserStatus, VerificationChannel};
use weldiwin_types::{ServiceError, ServiceResult};

use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::notify::{LogNotifier, Notifier, code_message};
use crate::oauth::{DisabledVerifier, IdentityVerifier};
use crate::uploads::{AudioUploader, DataUrlUploader};

/// Verification and reset codes stay valid for 15 minutes.
const CODE_TTL_MINUTES: i64 = 15;
/// One new verification code per minute.
const RESEND_COOLDOWN_SECS: i64 = 60;
const MIN_PASSWORD_LEN: usize = 6;
const FORGOT_PASSWORD_REPLY: &str = "If an account exists, a code has been sent";

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub services: Services,
    pub gateway: Gateway,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub notifier: Box<dyn Notifier>,
    pub uploader: Box<dyn AudioUploader>,
    pub verifier: Box<dyn IdentityVerifier>,
}

impl AppStateInner {
    /// State with log-only notifications, inline audio and Google login off.
    pub fn new(services: Services, jwt_secret: impl Into<String>) -> Self {
        Self {
            gateway: Gateway::new(services.clone(), true),
            services,
            jwt_secret: jwt_secret.into(),
            token_ttl: Duration::hours(168),
            notifier: Box::new(LogNotifier),
            uploader: Box::new(DataUrlUploader),
            verifier: Box::new(DisabledVerifier),
        }
    }
}

// -- Tokens & passwords --

pub fn create_token(secret: &str, actor: &Actor, ttl: Duration) -> ServiceResult<String> {
    let claims = Claims {
        sub: actor.id,
        role: actor.role,
        kind: actor.kind,
        exp: (Utc::now() + ttl).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServiceError::Internal(format!("token encoding failed: {e}")))
}

fn user_token(state: &AppStateInner, row: &UserRow) -> ServiceResult<String> {
    create_token(&state.jwt_secret, &Actor::user(row.id, row.role), state.token_ttl)
}

pub fn hash_password(password: &str) -> ServiceResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::Internal(format!("password hashing failed: {e}")))
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

pub fn validate_password(password: &str) -> ServiceResult<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ServiceError::invalid(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> ServiceResult<()> {
    if name.trim().is_empty() {
        return Err(ServiceError::invalid("name is required"));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> ServiceResult<()> {
    let valid = email
        .trim()
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(ServiceError::invalid("email must be a valid email address"));
    }
    Ok(())
}

fn generate_code() -> String {
    rand::rng().random_range(100_000..1_000_000u32).to_string()
}

/// Delivery failures are logged; the caller can ask for a new code.
async fn deliver_code(
    state: &AppStateInner,
    row: &UserRow,
    channel: VerificationChannel,
    subject: &str,
    text: String,
) {
    let Some(notification) = code_message(channel, &row.email, row.phone.as_deref(), subject, text)
    else {
        warn!("User {} has no phone number for an SMS code", row.id);
        return;
    };
    if let Err(e) = state.notifier.send(notification).await {
        warn!("Failed to deliver code to user {}: {}", row.id, e);
    }
}

async fn lookup(state: &AppStateInner, account: &AccountLookup) -> ServiceResult<Option<UserRow>> {
    state
        .services
        .accounts
        .find_by_email_or_phone(account.email.as_deref(), account.phone.as_deref())
        .await
}

// -- Handlers --

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_name(&req.name)?;
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    let user = state
        .services
        .accounts
        .create_account(NewUser {
            id: Uuid::new_v4(),
            name: req.name.trim().to_string(),
            email: req.email,
            phone: req.phone,
            password_hash: hash_password(&req.password)?,
            role: req.role.unwrap_or(Role::Parent),
            status: UserStatus::Active,
            avatar_url: None,
            is_verified: false,
            google_id: None,
        })
        .await?;

    let code = generate_code();
    let channel = req.verification_channel.unwrap_or(VerificationChannel::Email);
    state
        .services
        .accounts
        .store_verification_code(
            user.id,
            code.clone(),
            Utc::now() + Duration::minutes(CODE_TTL_MINUTES),
            channel,
        )
        .await?;

    let row = state.services.accounts.require(user.id).await?;
    deliver_code(
        &state,
        &row,
        channel,
        "Verify your WeldiWin account",
        format!("Your verification code is {code}. It expires in {CODE_TTL_MINUTES} minutes."),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(UserAuthResponse {
            user: row.to_user(),
            access_token: None,
            message: Some("Registration successful. Verification code sent.".into()),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Json<UserAuthResponse>> {
    let row = state
        .services
        .accounts
        .find_by_email_or_phone(Some(&req.email), None)
        .await?
        .ok_or_else(|| ServiceError::unauthorized("Invalid credentials"))?;

    if !verify_password(&req.password, &row.password) {
        return Err(ServiceError::unauthorized("Invalid credentials").into());
    }
    if row.status != UserStatus::Active {
        return Err(ServiceError::unauthorized("User account is inactive").into());
    }

    info!("{} logged in", row.id);
    Ok(Json(UserAuthResponse {
        access_token: Some(user_token(&state, &row)?),
        user: row.to_user(),
        message: None,
    }))
}

pub async fn login_qr(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<QrLoginRequest>,
) -> ApiResult<Json<ChildAuthResponse>> {
    let row = state
        .services
        .children
        .find_by_qr(&req.qr_code)
        .await?
        .ok_or_else(|| ServiceError::unauthorized("Invalid QR code"))?;
    if row.status != ChildStatus::Active {
        return Err(ServiceError::unauthorized("Child account is inactive").into());
    }

    let actor = Actor::child(row.id, row.main_parent);
    let access_token = create_token(&state.jwt_secret, &actor, state.token_ttl)?;
    let mut child = row.to_child();
    child.qr_code = None;

    info!("Child {} logged in with QR code", row.id);
    Ok(Json(ChildAuthResponse {
        child,
        access_token,
    }))
}

pub async fn login_google(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<GoogleLoginRequest>,
) -> ApiResult<Json<UserAuthResponse>> {
    let identity = state.verifier.verify(&req.id_token).await?;
    let accounts = &state.services.accounts;

    let existing = match accounts.find_by_google_id(&identity.subject).await? {
        Some(row) => Some(row),
        None => {
            let email = identity
                .email
                .as_deref()
                .ok_or_else(|| ServiceError::invalid("Email not provided by Google"))?;
            accounts.find_by_email_or_phone(Some(email), None).await?
        }
    };

    let row = match existing {
        Some(row) if row.google_id.is_none() => {
            accounts.link_google_id(row.id, identity.subject.clone()).await?;
            if row.avatar_url.is_none() && identity.picture.is_some() {
                let patch = UserPatch {
                    avatar_url: identity.picture.clone(),
                    ..Default::default()
                };
                accounts.update_account(row.id, patch).await?;
            }
            accounts.require(row.id).await?
        }
        Some(row) => row,
        None => {
            let email = identity
                .email
                .clone()
                .ok_or_else(|| ServiceError::invalid("Email not provided by Google"))?;
            // Never used for login; the account signs in through Google.
            let random_secret = hex_secret();
            let user = accounts
                .create_account(NewUser {
                    id: Uuid::new_v4(),
                    name: identity.name.clone().unwrap_or_else(|| "User".into()),
                    email,
                    phone: None,
                    password_hash: hash_password(&random_secret)?,
                    role: Role::Parent,
                    status: UserStatus::Active,
                    avatar_url: identity.picture.clone(),
                    is_verified: true,
                    google_id: Some(identity.subject.clone()),
                })
                .await?;
            accounts.require(user.id).await?
        }
    };

    if row.status != UserStatus::Active {
        return Err(ServiceError::unauthorized("User account is not active").into());
    }
    Ok(Json(UserAuthResponse {
        access_token: Some(user_token(&state, &row)?),
        user: row.to_user(),
        message: None,
    }))
}

fn hex_secret() -> String {
    let bytes: [u8; 24] = rand::rng().random();
    hex::encode(bytes)
}

pub async fn verify(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VerifyRequest>,
) -> ApiResult<Json<UserAuthResponse>> {
    let row = lookup(&state, &req.account)
        .await?
        .ok_or_else(|| ServiceError::unauthorized("User not found"))?;

    let (Some(code), Some(expires_at)) = (&row.verification_code, row.verification_expires_at)
    else {
        return Err(ServiceError::invalid("No verification in progress").into());
    };
    if expires_at < Utc::now() {
        return Err(ServiceError::invalid("Verification code expired").into());
    }
    if code != req.code.trim() {
        return Err(ServiceError::unauthorized("Invalid verification code").into());
    }

    state.services.accounts.mark_verified(row.id).await?;
    let row = state.services.accounts.require(row.id).await?;
    info!("User {} verified", row.id);

    Ok(Json(UserAuthResponse {
        access_token: Some(user_token(&state, &row)?),
        user: row.to_user(),
        message: Some("Account verified successfully".into()),
    }))
}

pub async fn resend_code(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CodeRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let row = lookup(&state, &req.account)
        .await?
        .ok_or_else(|| ServiceError::unauthorized("User not found"))?;
    if row.is_verified {
        return Ok(Json(MessageResponse {
            message: "Account already verified".into(),
        }));
    }
    if let Some(sent_at) = row.last_code_sent_at {
        if Utc::now() - sent_at < Duration::seconds(RESEND_COOLDOWN_SECS) {
            return Err(
                ServiceError::invalid("Please wait before requesting another code").into(),
            );
        }
    }

    let code = generate_code();
    let channel = req
        .channel
        .or(row.verification_channel)
        .unwrap_or(VerificationChannel::Email);
    state
        .services
        .accounts
        .store_verification_code(
            row.id,
            code.clone(),
            Utc::now() + Duration::minutes(CODE_TTL_MINUTES),
            channel,
        )
        .await?;
    deliver_code(
        &state,
        &row,
        channel,
        "Your verification code",
        format!("Your verification code is {code}. It expires in {CODE_TTL_MINUTES} minutes."),
    )
    .await;

    Ok(Json(MessageResponse {
        message: "Verification code sent".into(),
    }))
}

/// Replies identically whether or not the account exists.
pub async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CodeRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let reply = Json(MessageResponse {
        message: FORGOT_PASSWORD_REPLY.into(),
    });
    let Some(row) = lookup(&state, &req.account).await? else {
        return Ok(reply);
    };

    let code = generate_code();
    let channel = req.channel.unwrap_or(VerificationChannel::Email);
    state
        .services
        .accounts
        .store_reset_code(
            row.id,
            code.clone(),
            Utc::now() + Duration::minutes(CODE_TTL_MINUTES),
        )
        .await?;
    deliver_code(
        &state,
        &row,
        channel,
        "Reset your password",
        format!("Your password reset code is {code}. It expires in {CODE_TTL_MINUTES} minutes."),
    )
    .await;

    Ok(reply)
}

pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let row = lookup(&state, &req.account)
        .await?
        .ok_or_else(|| ServiceError::unauthorized("Invalid reset code"))?;

    let (Some(code), Some(expires_at)) = (&row.reset_code, row.reset_expires_at) else {
        return Err(ServiceError::invalid("No reset in progress").into());
    };
    if expires_at < Utc::now() {
        return Err(ServiceError::invalid("Reset code expired").into());
    }
    if code != req.code.trim() {
        return Err(ServiceError::unauthorized("Invalid reset code").into());
    }
    validate_password(&req.new_password)?;

    state
        .services
        .accounts
        .reset_password(row.id, hash_password(&req.new_password)?)
        .await?;
    info!("Password reset for user {}", row.id);

    Ok(Json(MessageResponse {
        message: "Password has been reset successfully".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn password_hash_round_trips() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-phc-string"));
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(matches!(
            validate_password("12345"),
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(validate_password("123456").is_ok());
    }
}
