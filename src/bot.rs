use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::{self, PROCESSING_NOTICE};
use crate::llm::{ChatMessage, CompletionApi};
use crate::platform::{BotIdentity, MessageEvent, ThreadMessage};

/// The outgoing-reply and history-fetch capabilities the orchestrator needs
/// from the chat platform. Injected so tests can run the handler against
/// recorded mocks instead of live Slack.
#[async_trait]
pub trait ChatSurface: Send + Sync {
    async fn post_message(&self, channel: &str, text: &str, thread_ts: Option<&str>)
        -> Result<()>;

    /// Chronological (oldest first) messages of one thread, including its
    /// root and the triggering reply.
    async fn fetch_thread_replies(
        &self,
        channel: &str,
        thread_ts: &str,
        limit: u32,
    ) -> Result<Vec<ThreadMessage>>;
}

/// Shared application state, constructed once at startup and injected into
/// the handler for every event.
pub struct AppState {
    pub chat: Arc<dyn ChatSurface>,
    pub llm: Arc<dyn CompletionApi>,
    pub config: Config,
    /// This bot's own identity, resolved at startup. Used for loop
    /// prevention and for role classification of thread history.
    pub bot: BotIdentity,
}

/// Handle one inbound message event: zero or one reply, plus an interim
/// notice. Every error past the guards is absorbed here and converted into
/// the fixed user-facing fallback message; nothing escapes to kill the
/// listener loop.
pub async fn handle_event(state: &AppState, event: &MessageEvent) {
    // Loop prevention: never respond to bot-authored messages, our own included.
    if event.bot_id.is_some()
        || (!state.bot.user_id.is_empty() && event.user == state.bot.user_id)
    {
        debug!("Ignoring bot-authored message in {}", event.channel);
        return;
    }

    let query = event.text.trim();
    if query.is_empty() {
        debug!("Ignoring empty message in {}", event.channel);
        return;
    }

    let anchor = event.anchor_ts().to_string();
    info!("Message in {} (anchor {}): {}", event.channel, anchor, query);

    // Interim acknowledgment; a UX affordance, its failure must not abort the event.
    if let Err(e) = state
        .chat
        .post_message(&event.channel, PROCESSING_NOTICE, Some(&anchor))
        .await
    {
        warn!("Failed to post processing notice: {:#}", e);
    }

    match run_completion(state, event, query).await {
        Ok(reply) => {
            if let Err(e) = state
                .chat
                .post_message(&event.channel, &reply, Some(&anchor))
                .await
            {
                error!("Failed to post reply: {:#}", e);
            }
        }
        Err(e) => {
            error!("Error processing message: {:#}", e);
            if let Err(post_err) = state
                .chat
                .post_message(&event.channel, &state.config.fallback_message(), Some(&anchor))
                .await
            {
                error!("Failed to post fallback message: {:#}", post_err);
            }
        }
    }
}

/// Assemble the conversation and make the single completion attempt.
async fn run_completion(state: &AppState, event: &MessageEvent, query: &str) -> Result<String> {
    let conversation = match &event.thread_ts {
        Some(thread_ts) => {
            match state
                .chat
                .fetch_thread_replies(
                    &event.channel,
                    thread_ts,
                    state.config.slack.thread_fetch_limit,
                )
                .await
            {
                Ok(history) => {
                    let turns = context::build_conversation(&history, &state.bot);
                    if turns.is_empty() {
                        vec![ChatMessage::user(query)]
                    } else {
                        turns
                    }
                }
                // Degrade to single-turn rather than failing the whole event.
                Err(e) => {
                    warn!("Failed to fetch thread history: {:#}", e);
                    vec![ChatMessage::user(query)]
                }
            }
        }
        None => vec![ChatMessage::user(query)],
    };

    state.llm.complete(&conversation).await
}
