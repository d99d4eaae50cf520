//! Outbound email/SMS delivery for verification and reset codes.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use weldiwin_types::models::VerificationChannel;

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub channel: VerificationChannel,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// False when messages only go to the log.
    fn configured(&self) -> bool;

    async fn send(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Development notifier: writes every message to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn configured(&self) -> bool {
        false
    }

    async fn send(&self, n: Notification) -> anyhow::Result<()> {
        info!(
            "[dev-{}] To: {} | {} | {}",
            n.channel.as_str(),
            n.to,
            n.subject,
            n.body
        );
        Ok(())
    }
}

/// Hands each message to an HTTP relay that owns the SMTP/SMS credentials.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn configured(&self) -> bool {
        true
    }

    async fn send(&self, n: Notification) -> anyhow::Result<()> {
        let resp = self.client.post(&self.url).json(&n).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("notification relay returned {}", resp.status());
        }
        Ok(())
    }
}

/// Picks the webhook relay when a URL is configured, the log otherwise.
pub fn notifier(webhook_url: Option<&str>) -> Box<dyn Notifier> {
    match webhook_url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => {
            info!("Notifications relayed to {}", url);
            Box::new(WebhookNotifier::new(url))
        }
        None => {
            warn!("No notification relay configured; codes will be logged only");
            Box::new(LogNotifier)
        }
    }
}

/// Builds the code message for the requested channel.
pub fn code_message(
    channel: VerificationChannel,
    email: &str,
    phone: Option<&str>,
    subject: &str,
    text: String,
) -> Option<Notification> {
    let to = match channel {
        VerificationChannel::Email => email.to_string(),
        VerificationChannel::Sms => phone?.to_string(),
    };
    Some(Notification {
        channel,
        to,
        subject: subject.to_string(),
        body: text,
    })
}
