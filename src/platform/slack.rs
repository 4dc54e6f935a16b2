use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info};

use crate::bot::{self, AppState, ChatSurface};
use crate::config::SlackConfig;
use crate::platform::{BotIdentity, MessageEvent, ThreadMessage};

/// Slack Web API client: message posting, thread history, identity
/// resolution, and Socket Mode connection URLs.
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    app_token: String,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    ok: bool,
    user_id: Option<String>,
    user: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationsRepliesResponse {
    ok: bool,
    #[serde(default)]
    messages: Vec<SlackHistoryMessage>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenConnectionResponse {
    ok: bool,
    url: Option<String>,
    error: Option<String>,
}

/// Wire shape of one message in a `conversations.replies` result.
#[derive(Debug, Clone, Deserialize)]
struct SlackHistoryMessage {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    ts: String,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

impl From<SlackHistoryMessage> for ThreadMessage {
    fn from(raw: SlackHistoryMessage) -> Self {
        ThreadMessage {
            user: raw.user,
            text: raw.text,
            ts: raw.ts,
            bot_id: raw.bot_id,
            app_id: raw.app_id,
            username: raw.username,
        }
    }
}

impl SlackClient {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .context("Failed to build Slack HTTP client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            app_token: config.app_token.clone(),
        })
    }

    /// Resolve this bot's own identity via `auth.test`. Called once at
    /// startup; the id and name drive loop prevention and role
    /// classification.
    pub async fn resolve_bot_identity(&self) -> Result<BotIdentity> {
        let response: AuthTestResponse = self
            .http
            .post(format!("{}/auth.test", self.api_base))
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .context("auth.test request failed")?
            .json()
            .await
            .context("Failed to parse auth.test response")?;

        if !response.ok {
            bail!(
                "auth.test failed: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        let user_id = response
            .user_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| anyhow!("auth.test did not return a user_id"))?;
        Ok(BotIdentity {
            user_id,
            username: response.user.filter(|name| !name.trim().is_empty()),
        })
    }

    /// Request a Socket Mode websocket URL with the app-level token.
    pub async fn open_socket_connection(&self) -> Result<String> {
        let response: OpenConnectionResponse = self
            .http
            .post(format!("{}/apps.connections.open", self.api_base))
            .bearer_auth(&self.app_token)
            .send()
            .await
            .context("apps.connections.open request failed")?
            .json()
            .await
            .context("Failed to parse apps.connections.open response")?;

        if !response.ok {
            bail!(
                "apps.connections.open failed: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        response
            .url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| anyhow!("apps.connections.open did not return a url"))
    }
}

#[async_trait]
impl ChatSurface for SlackClient {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<()> {
        let mut payload = json!({
            "channel": channel,
            "text": text,
        });
        if let Some(thread_ts) = thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.to_string());
        }

        let response: PostMessageResponse = self
            .http
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(&self.bot_token)
            .json(&payload)
            .send()
            .await
            .context("chat.postMessage request failed")?
            .json()
            .await
            .context("Failed to parse chat.postMessage response")?;

        if !response.ok {
            bail!(
                "chat.postMessage failed: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }

    async fn fetch_thread_replies(
        &self,
        channel: &str,
        thread_ts: &str,
        limit: u32,
    ) -> Result<Vec<ThreadMessage>> {
        let response: ConversationsRepliesResponse = self
            .http
            .get(format!("{}/conversations.replies", self.api_base))
            .bearer_auth(&self.bot_token)
            .query(&[
                ("channel", channel),
                ("ts", thread_ts),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .context("conversations.replies request failed")?
            .json()
            .await
            .context("Failed to parse conversations.replies response")?;

        if !response.ok {
            bail!(
                "conversations.replies failed: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(response.messages.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Deserialize)]
struct SocketEnvelope {
    #[serde(default)]
    envelope_id: String,
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct EventCallback {
    #[serde(rename = "type")]
    callback_type: String,
    event: EventPayload,
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
}

fn parse_socket_frame(message: WsMessage) -> Result<Option<SocketEnvelope>> {
    match message {
        WsMessage::Text(text) => {
            let envelope = serde_json::from_str::<SocketEnvelope>(&text)
                .context("Failed to parse socket envelope")?;
            Ok(Some(envelope))
        }
        WsMessage::Binary(bytes) => {
            let text = String::from_utf8(bytes.to_vec())
                .context("Invalid UTF-8 in socket payload")?;
            let envelope = serde_json::from_str::<SocketEnvelope>(&text)
                .context("Failed to parse socket envelope")?;
            Ok(Some(envelope))
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) | WsMessage::Frame(_) => {
            Ok(None)
        }
    }
}

/// Turn an acked envelope into an inbound event, or None for everything that
/// is not a plain channel message (hello, disconnect, edits, deletions).
/// Bot-authored messages pass through with their marker set; the handler
/// owns the loop-prevention decision.
fn normalize_envelope(envelope: &SocketEnvelope) -> Option<MessageEvent> {
    if envelope.envelope_type != "events_api" {
        return None;
    }
    let callback = serde_json::from_value::<EventCallback>(envelope.payload.clone()).ok()?;
    if callback.callback_type != "event_callback" {
        return None;
    }

    let event = callback.event;
    if event.event_type != "message" {
        return None;
    }
    // Edits, deletions, joins etc. carry a subtype and no usable text;
    // bot_message is the one subtype that is still a real message.
    if let Some(subtype) = event.subtype.as_deref() {
        if subtype != "bot_message" {
            return None;
        }
    }

    let channel = event.channel.filter(|c| !c.trim().is_empty())?;
    let ts = event.ts.filter(|ts| !ts.trim().is_empty())?;

    Some(MessageEvent {
        channel,
        user: event.user.unwrap_or_default(),
        text: event.text.unwrap_or_default(),
        ts,
        thread_ts: event.thread_ts,
        bot_id: event.bot_id,
    })
}

/// Run the Socket Mode listener: connect, ack and dispatch envelopes
/// sequentially, reconnect on failure, exit when the shutdown signal fires.
pub async fn run(
    client: Arc<SlackClient>,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let reconnect_delay = Duration::from_secs(state.config.slack.reconnect_delay_secs.max(1));

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        match client.open_socket_connection().await {
            Ok(socket_url) => {
                info!("Socket Mode connected");
                if let Err(e) = run_socket_session(&socket_url, &state, &mut shutdown).await {
                    error!("Socket session ended with error: {:#}", e);
                }
            }
            Err(e) => {
                error!("Failed to open socket connection: {:#}", e);
            }
        }

        if *shutdown.borrow() {
            return Ok(());
        }
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
}

async fn run_socket_session(
    socket_url: &str,
    state: &AppState,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let (stream, _response) = connect_async(socket_url)
        .await
        .context("Failed to connect Socket Mode websocket")?;
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            maybe_frame = source.next() => {
                let Some(frame) = maybe_frame else {
                    // Server closed the stream; caller reconnects.
                    return Ok(());
                };
                let frame = frame.context("Failed reading websocket frame")?;
                let Some(envelope) = parse_socket_frame(frame)? else {
                    continue;
                };

                // Slack expects an ack for every envelope that carries an id,
                // before any slow work happens.
                if !envelope.envelope_id.is_empty() {
                    let ack = json!({ "envelope_id": envelope.envelope_id }).to_string();
                    sink.send(WsMessage::Text(ack.into()))
                        .await
                        .context("Failed to send socket ack")?;
                }

                if envelope.envelope_type == "disconnect" {
                    info!("Server requested socket refresh, reconnecting");
                    return Ok(());
                }

                if let Some(event) = normalize_envelope(&envelope) {
                    debug!("Inbound event in {} at {}", event.channel, event.ts);
                    // Sequential dispatch: replies within a thread keep the
                    // order their triggering events arrived in.
                    bot::handle_event(state, &event).await;
                } else {
                    debug!("Ignoring non-message envelope: {}", envelope.envelope_type);
                }
            }
        }
    }
}
