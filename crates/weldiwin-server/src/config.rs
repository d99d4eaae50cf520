use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

/// Secrets that ship in sample files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "change-me", "changeme", "secret"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub store_timeout: Duration,
    pub enforce_membership: bool,
    pub google_client_id: Option<String>,
    pub cloudinary_url: Option<String>,
    pub notify_webhook_url: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = var("WELDIWIN_JWT_SECRET").context("WELDIWIN_JWT_SECRET must be set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("WELDIWIN_JWT_SECRET is a placeholder value; set a real secret");
        }

        let port = match var("WELDIWIN_PORT") {
            Some(raw) => raw.parse().context("WELDIWIN_PORT must be a port number")?,
            None => 3000,
        };
        let ttl_hours: i64 = match var("WELDIWIN_TOKEN_TTL_HOURS") {
            Some(raw) => raw
                .parse()
                .context("WELDIWIN_TOKEN_TTL_HOURS must be a whole number")?,
            None => 168,
        };
        if ttl_hours <= 0 {
            bail!("WELDIWIN_TOKEN_TTL_HOURS must be positive");
        }
        let timeout_ms: u64 = match var("WELDIWIN_STORE_TIMEOUT_MS") {
            Some(raw) => raw
                .parse()
                .context("WELDIWIN_STORE_TIMEOUT_MS must be a whole number")?,
            None => 5000,
        };
        let enforce_membership = match var("WELDIWIN_GATEWAY_ENFORCE_MEMBERSHIP") {
            Some(raw) => parse_flag(&raw)
                .context("WELDIWIN_GATEWAY_ENFORCE_MEMBERSHIP must be true or false")?,
            None => true,
        };

        Ok(Self {
            host: var("WELDIWIN_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: PathBuf::from(var("WELDIWIN_DB_PATH").unwrap_or_else(|| "weldiwin.db".into())),
            jwt_secret,
            token_ttl: chrono::Duration::hours(ttl_hours),
            store_timeout: Duration::from_millis(timeout_ms),
            enforce_membership,
            google_client_id: var("WELDIWIN_GOOGLE_CLIENT_ID"),
            cloudinary_url: var("WELDIWIN_CLOUDINARY_URL"),
            notify_webhook_url: var("WELDIWIN_NOTIFY_WEBHOOK_URL"),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
