//! Reduces a message history to the exact string handed to the backend.

use crate::error::ExecutorError;
use serde::{Deserialize, Serialize};

/// A single message in a chat history, reduced to the two fields the
/// prompt builder cares about.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    /// `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    /// Message body.
    pub content: String,
}

/// Build the prompt string the CLI backend receives.
///
/// When `resuming` is true, returns the last user message's content
/// verbatim, failing with [`ExecutorError::NoUserMessage`] if none exists.
/// Otherwise, system messages are dropped; zero or one remaining message
/// is returned as-is (empty string if none), and more than one is rendered
/// as a conversation-history block followed by the current query.
pub fn build_prompt(messages: &[Message], resuming: bool) -> Result<String, ExecutorError> {
    if resuming {
        return messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .ok_or(ExecutorError::NoUserMessage);
    }

    let non_system: Vec<&Message> = messages.iter().filter(|m| m.role != "system").collect();

    if non_system.len() <= 1 {
        return Ok(non_system.first().map(|m| m.content.clone()).unwrap_or_default());
    }

    let (history, last) = non_system.split_at(non_system.len() - 1);
    let last = last[0];

    let mut out = String::new();
    out.push_str("--- CONVERSATION HISTORY ---\n");
    for msg in history {
        let label = if msg.role == "assistant" { "Assistant" } else { "User" };
        out.push_str(&format!("{label}: {}\n", msg.content));
    }
    out.push_str("--- END HISTORY ---\n\nCurrent query:\n");
    out.push_str(&last.content);

    Ok(out)
}
