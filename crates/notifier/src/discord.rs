//! Discord direct-message transport.
//!
//! Delivery opens (or reuses) the DM channel with the recipient, then posts the
//! payload as one embed. DM channel ids are cached per recipient for the lifetime
//! of the process.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use herald_common::error::DeliveryError;
use herald_common::types::NotificationPayload;
use herald_engine::orchestrator::DeliveryTransport;

/// "Cannot send messages to this user" (DMs closed, no shared guild, blocked).
const CANNOT_MESSAGE_USER: u64 = 50007;
/// "Unknown User".
const UNKNOWN_USER: u64 = 10013;

const TITLE_LIMIT: usize = 256;
const DESCRIPTION_LIMIT: usize = 4096;
const FIELD_NAME_LIMIT: usize = 256;
const FIELD_VALUE_LIMIT: usize = 1024;
const FOOTER_LIMIT: usize = 2048;
const MAX_FIELDS: usize = 25;

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    /// REST API base URL (default: `https://discord.com/api/v10`)
    pub api_url: String,
    pub bot_token: String,
    /// Timeout for each HTTP request (default: 30 seconds)
    pub request_timeout: Duration,
}

impl DiscordConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            api_url: "https://discord.com/api/v10".to_string(),
            bot_token: bot_token.into(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscordErrorBody {
    #[serde(default)]
    code: u64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DmChannel {
    id: String,
}

/// Which request failed; a 403 only means "unreachable" when opening the DM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    OpenDm,
    SendMessage,
}

/// Map a non-success Discord response to a delivery error.
fn classify_failure(stage: Stage, status: StatusCode, body: &str) -> DeliveryError {
    let parsed: Option<DiscordErrorBody> = serde_json::from_str(body).ok();
    let (code, message) = parsed
        .map(|b| (b.code, b.message))
        .unwrap_or((0, body.to_string()));

    let permanent = code == CANNOT_MESSAGE_USER
        || code == UNKNOWN_USER
        || (stage == Stage::OpenDm && status == StatusCode::FORBIDDEN);

    let detail = format!("{} (status {}, code {})", message, status.as_u16(), code);
    if permanent {
        DeliveryError::Unreachable(detail)
    } else {
        DeliveryError::Transient(detail)
    }
}

fn clip(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(limit.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}

/// Render a payload as a Discord embed within the platform's limits.
pub fn render_embed(payload: &NotificationPayload) -> Value {
    let fields: Vec<Value> = payload
        .fields
        .iter()
        .take(MAX_FIELDS)
        .map(|f| {
            json!({
                "name": clip(&f.name, FIELD_NAME_LIMIT),
                "value": clip(&f.value, FIELD_VALUE_LIMIT),
                "inline": f.inline,
            })
        })
        .collect();

    let mut embed = json!({
        "title": clip(&payload.title, TITLE_LIMIT),
        "description": clip(&payload.description, DESCRIPTION_LIMIT),
        "color": payload.color,
        "fields": fields,
        "footer": { "text": clip(&payload.footer, FOOTER_LIMIT) },
        "timestamp": payload.timestamp.to_rfc3339(),
    });
    if let Some(url) = &payload.url {
        embed["url"] = json!(url);
    }
    embed
}

/// Sends release notifications as Discord DMs through the bot account.
pub struct DiscordTransport {
    config: DiscordConfig,
    http_client: reqwest::Client,
    dm_channels: RwLock<HashMap<String, String>>,
}

impl DiscordTransport {
    pub fn new(config: DiscordConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("DiscordBot (herald, ", env!("CARGO_PKG_VERSION"), ")"))
            .build()?;

        Ok(Self {
            config,
            http_client,
            dm_channels: RwLock::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn post(&self, stage: Stage, path: &str, body: &Value) -> Result<String, DeliveryError> {
        let response = self
            .http_client
            .post(self.url(path))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bot {}", self.config.bot_token),
            )
            .json(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("request to {} failed: {}", path, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeliveryError::Transient(format!("reading {} response failed: {}", path, e)))?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(classify_failure(stage, status, &text))
        }
    }

    async fn dm_channel(&self, recipient_id: &str) -> Result<String, DeliveryError> {
        if let Some(channel_id) = self.dm_channels.read().await.get(recipient_id) {
            return Ok(channel_id.clone());
        }

        let body = self
            .post(
                Stage::OpenDm,
                "/users/@me/channels",
                &json!({ "recipient_id": recipient_id }),
            )
            .await?;
        let channel: DmChannel = serde_json::from_str(&body)
            .map_err(|e| DeliveryError::Transient(format!("malformed DM channel: {}", e)))?;

        self.dm_channels
            .write()
            .await
            .insert(recipient_id.to_string(), channel.id.clone());
        Ok(channel.id)
    }
}

#[async_trait]
impl DeliveryTransport for DiscordTransport {
    async fn deliver(
        &self,
        recipient_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        let channel_id = self.dm_channel(recipient_id).await?;
        self.post(
            Stage::SendMessage,
            &format!("/channels/{}/messages", channel_id),
            &json!({ "embeds": [render_embed(payload)] }),
        )
        .await?;

        tracing::debug!(recipient_id = %recipient_id, channel_id = %channel_id, "Discord DM sent");
        Ok(())
    }
}
