pub mod slack;

/// An inbound chat message event, normalized from the platform's wire format.
/// Ephemeral; one per handler invocation, never persisted.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Channel the message was posted in.
    pub channel: String,
    /// Author's platform user id (empty when only a bot identity is present).
    pub user: String,
    /// Raw message text.
    pub text: String,
    /// The message's own timestamp.
    pub ts: String,
    /// Present when the message is a reply inside a thread.
    pub thread_ts: Option<String>,
    /// Set when the platform marked the message as bot-authored.
    pub bot_id: Option<String>,
}

impl MessageEvent {
    /// The thread-root timestamp a reply should be nested under: the thread
    /// the event belongs to, or the event itself when it starts a new one.
    pub fn anchor_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

/// This bot's own platform identity, resolved once at startup. Drives loop
/// prevention and role classification of thread history.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub user_id: String,
    /// Display name, when the platform reports one.
    pub username: Option<String>,
}

/// A raw message fetched from a thread's history, before role classification.
#[derive(Debug, Clone, Default)]
pub struct ThreadMessage {
    pub user: Option<String>,
    pub text: String,
    pub ts: String,
    pub bot_id: Option<String>,
    pub app_id: Option<String>,
    pub username: Option<String>,
}
