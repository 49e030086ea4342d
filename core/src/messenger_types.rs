/// Shared types published to the UI shell
use crate::realtime::ChannelState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of one conversation thread (for the contact list)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Sorted pair key, "{low}:{high}"
    pub conversation_key: String,
    /// The other participant
    pub peer_email: String,
    /// Body of the last message; `None` when it was deleted
    pub last_preview: Option<String>,
    pub last_timestamp: DateTime<Utc>,
    pub message_count: usize,
}

/// Session events, broadcast to every subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// The contact list was (re)computed
    ContactsLoaded { count: usize },
    /// History for the selected contact landed in the message list
    ConversationLoaded { contact_email: String, count: usize },
    /// The active message list changed
    MessagesChanged { conversation_key: String },
    /// The realtime channel moved to a new state
    ChannelStateChanged { state: ChannelState },
    /// An optimistic send was rolled back
    SendFailed { temp_id: String, error: String },
    /// An edit or delete is applied locally but not on the server
    MutationUnsynced { message_id: String, error: String },
}
