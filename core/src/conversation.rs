/// Conversations as a derived view over message rows
///
/// There is no conversation record: a conversation is the set of messages
/// between two emails, ordered by `created_at`.
use crate::message::Message;
use crate::messenger_types::ConversationSummary;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order-independent identifier of a participant pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey {
    low: String,
    high: String,
}

impl ConversationKey {
    pub fn new(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.to_string(),
            high: high.to_string(),
        }
    }

    pub fn participants(&self) -> (&str, &str) {
        (&self.low, &self.high)
    }

    pub fn includes(&self, email: &str) -> bool {
        self.low == email || self.high == email
    }

    /// The participant that is not `me`
    pub fn other<'a>(&'a self, me: &str) -> &'a str {
        if self.low == me {
            &self.high
        } else {
            &self.low
        }
    }

    /// True if the message belongs to this pair, either direction
    pub fn matches(&self, msg: &Message) -> bool {
        msg.is_between(&self.low, &self.high)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

/// Stable sort by `created_at`; equal timestamps keep insertion order
pub fn sort_chronologically(messages: &mut [Message]) {
    messages.sort_by_key(|m| m.created_at);
}

/// Messages of one conversation out of an arbitrary row set
pub fn derive_conversation(rows: &[Message], key: &ConversationKey) -> Vec<Message> {
    let mut out: Vec<Message> = rows.iter().filter(|m| key.matches(m)).cloned().collect();
    sort_chronologically(&mut out);
    out
}

/// Preview data for the contact list. `None` for an empty conversation.
pub fn summarize(key: &ConversationKey, me: &str, messages: &[Message]) -> Option<ConversationSummary> {
    let last = messages.iter().filter(|m| key.matches(m)).max_by_key(|m| m.created_at)?;
    Some(ConversationSummary {
        conversation_key: key.to_string(),
        peer_email: key.other(me).to_string(),
        last_preview: if last.is_deleted {
            None
        } else {
            Some(last.message.clone())
        },
        last_timestamp: last.created_at,
        message_count: messages.iter().filter(|m| key.matches(m)).count(),
    })
}
