use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use weldiwin_types::{ServiceError, ServiceResult};

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// The claims of a verified external ID token that login needs.
#[derive(Debug, Clone, Default)]
pub struct ExternalIdentity {
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    fn configured(&self) -> bool;

    async fn verify(&self, id_token: &str) -> ServiceResult<ExternalIdentity>;
}

/// Used when no OAuth client id is configured.
pub struct DisabledVerifier;

#[async_trait]
impl IdentityVerifier for DisabledVerifier {
    fn configured(&self) -> bool {
        false
    }

    async fn verify(&self, _id_token: &str) -> ServiceResult<ExternalIdentity> {
        Err(ServiceError::Unavailable(
            "Google login is not configured".into(),
        ))
    }
}

#[derive(Deserialize)]
struct TokenInfo {
    aud: String,
    iss: String,
    sub: String,
    email: Option<String>,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

/// Validates Google ID tokens through the tokeninfo endpoint.
pub struct GoogleVerifier {
    client: reqwest::Client,
    client_id: String,
}

impl GoogleVerifier {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: client_id.into(),
        }
    }
}

fn rejected(reason: impl std::fmt::Display) -> ServiceError {
    ServiceError::unauthorized(format!("Google authentication failed: {reason}"))
}

#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    fn configured(&self) -> bool {
        true
    }

    async fn verify(&self, id_token: &str) -> ServiceResult<ExternalIdentity> {
        let resp = self
            .client
            .get(TOKENINFO_URL)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| ServiceError::Unavailable(format!("Google tokeninfo unreachable: {e}")))?;
        if !resp.status().is_success() {
            return Err(rejected("invalid token"));
        }
        let info: TokenInfo = resp.json().await.map_err(rejected)?;

        if info.aud != self.client_id {
            warn!("Google token issued for another audience");
            return Err(rejected("wrong audience"));
        }
        if info.iss != "accounts.google.com" && info.iss != "https://accounts.google.com" {
            return Err(rejected("wrong issuer"));
        }

        let name = info.name.or_else(|| {
            let full = [info.given_name, info.family_name]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            (!full.is_empty()).then_some(full)
        });
        Ok(ExternalIdentity {
            subject: info.sub,
            email: info.email,
            name,
            picture: info.picture,
        })
    }
}

pub fn identity_verifier(client_id: Option<&str>) -> Box<dyn IdentityVerifier> {
    match client_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => {
            info!("Google login enabled");
            Box::new(GoogleVerifier::new(id))
        }
        None => Box::new(DisabledVerifier),
    }
}
