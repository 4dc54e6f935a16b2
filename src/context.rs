use crate::llm::ChatMessage;
use crate::platform::{BotIdentity, ThreadMessage};

/// Interim acknowledgment posted while a completion call is in flight.
/// Filtered back out of thread history so it never reaches the model.
pub const PROCESSING_NOTICE: &str = "_Processing your message..._";

/// Convert a thread's raw messages (chronological, oldest first) into the
/// role-tagged conversation sent to the completion provider.
///
/// Prior replies from this bot are kept as `assistant` turns so multi-turn
/// threads retain both sides of the exchange. A message counts as
/// bot-authored when its author id or display name matches the bot's own
/// identity, or it carries a bot/app identity marker. Empty messages and the
/// bot's own interim processing notices are dropped. Ordering is preserved.
pub fn build_conversation(messages: &[ThreadMessage], bot: &BotIdentity) -> Vec<ChatMessage> {
    let mut conversation = Vec::with_capacity(messages.len());

    for message in messages {
        let text = message.text.trim();
        if text.is_empty() {
            continue;
        }
        if text == PROCESSING_NOTICE {
            continue;
        }

        let turn = if is_bot_authored(message, bot) {
            ChatMessage::assistant(text)
        } else {
            ChatMessage::user(text)
        };
        conversation.push(turn);
    }

    conversation
}

fn is_bot_authored(message: &ThreadMessage, bot: &BotIdentity) -> bool {
    if !bot.user_id.is_empty() && message.user.as_deref() == Some(bot.user_id.as_str()) {
        return true;
    }
    if let (Some(own_name), Some(name)) = (bot.username.as_deref(), message.username.as_deref()) {
        if name.eq_ignore_ascii_case(own_name) {
            return true;
        }
    }
    message.bot_id.is_some() || message.app_id.is_some()
}
