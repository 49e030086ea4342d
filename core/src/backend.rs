/// Persistence, realtime and directory boundaries
///
/// The messaging core never talks to a database directly; it drives these
/// traits. `memory_backend` provides an in-process implementation.
use crate::contact_resolver::Contact;
use crate::conversation::ConversationKey;
use crate::error::Result;
use crate::identity::Role;
use crate::message::{Message, MessagePatch, NewMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Row-level change delivered by the realtime feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeEvent {
    Insert { record: Message },
    Update { record: Message },
    Delete { id: String },
}

/// Opaque handle for an open realtime subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// An open change feed. Dropping `events` closes the local end only;
/// call `MessageBackend::unsubscribe` to release the server side.
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

#[async_trait]
pub trait MessageBackend: Send + Sync + 'static {
    /// Every message between `a` and `b` in either direction, `created_at` ascending
    async fn query_conversation(&self, a: &str, b: &str) -> Result<Vec<Message>>;

    /// Persist a new message; the returned record carries server id and timestamp
    async fn insert(&self, record: NewMessage) -> Result<Message>;

    async fn update(&self, id: &str, patch: MessagePatch) -> Result<()>;

    /// Open a change feed named after `key`. Completes once the handshake is done.
    async fn subscribe(&self, key: &ConversationKey) -> Result<Subscription>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

/// Equality filter applied to a directory table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryFilter {
    pub field: String,
    pub value: String,
}

impl DirectoryFilter {
    pub fn domain(value: impl Into<String>) -> Self {
        Self {
            field: "domain".to_string(),
            value: value.into(),
        }
    }

    pub fn matches(&self, contact: &Contact) -> bool {
        match self.field.as_str() {
            "domain" => contact.domain.as_deref() == Some(self.value.as_str()),
            "email" => contact.email == self.value,
            "id" => contact.id == self.value,
            "name" => contact.name == self.value,
            _ => false,
        }
    }
}

/// Role-scoped people directory, owned outside the messaging core
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// Rows of the table for `role`, optionally filtered. Returned contacts carry `role`.
    async fn query_table(&self, role: Role, filter: Option<DirectoryFilter>) -> Result<Vec<Contact>>;

    /// The caller's own row
    async fn get_self(&self, email: &str, role: Role) -> Result<Option<Contact>>;
}
