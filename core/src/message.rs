/// Message records and write payloads
use crate::contact_resolver::Contact;
use crate::identity::{Identity, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the local copy of a message is known to match the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Synced,
    /// A local edit or delete failed to persist and was not rolled back
    Unsynced,
}

/// One direct message row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_email: String,
    pub receiver_email: String,
    pub sender_role: Role,
    pub message: String,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_forwarded: bool,
    #[serde(default)]
    pub reply_to_message: Option<String>,
    #[serde(default)]
    pub reply_to_sender: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Correlation id echoed back by the persistence layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
    #[serde(rename = "_optimistic", default)]
    pub optimistic: bool,
    #[serde(default)]
    pub sync_state: SyncState,
}

impl Message {
    /// True if `(sender, receiver)` is `(a, b)` in either direction
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender_email == a && self.receiver_email == b)
            || (self.sender_email == b && self.receiver_email == a)
    }

    /// Overwrite every persisted field with `newer`. The result is never
    /// optimistic, and is `Synced` only if it now matches `newer`; a local
    /// delete kept over an undeleted record stays as it was.
    pub fn merge_from(&mut self, newer: &Message) {
        self.id = newer.id.clone();
        self.sender_email = newer.sender_email.clone();
        self.receiver_email = newer.receiver_email.clone();
        self.sender_role = newer.sender_role;
        self.message = newer.message.clone();
        self.is_deleted = self.is_deleted || newer.is_deleted;
        self.is_forwarded = newer.is_forwarded;
        self.reply_to_message = newer.reply_to_message.clone();
        self.reply_to_sender = newer.reply_to_sender.clone();
        self.created_at = newer.created_at;
        if newer.client_ref.is_some() {
            self.client_ref = newer.client_ref.clone();
        }
        self.optimistic = false;
        if self.is_deleted == newer.is_deleted {
            self.sync_state = SyncState::Synced;
        }
    }
}

/// Quoted context for a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyContext {
    pub message: String,
    pub sender: String,
}

impl ReplyContext {
    /// Quote `msg`, naming its sender the way the caller sees them: their own
    /// display name, the contact's name, or the raw email as a last resort.
    pub fn for_message(msg: &Message, identity: &Identity, self_name: &str, contacts: &[Contact]) -> Self {
        let sender = if identity.is_self(&msg.sender_email) {
            self_name.to_string()
        } else {
            contacts
                .iter()
                .find(|c| c.email == msg.sender_email)
                .map(|c| c.display_name().to_string())
                .unwrap_or_else(|| msg.sender_email.clone())
        };
        Self {
            message: msg.message.clone(),
            sender,
        }
    }
}

/// Optional send attributes beyond the body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendExtra {
    pub reply_to: Option<ReplyContext>,
    pub is_forwarded: bool,
}

impl SendExtra {
    pub fn reply(ctx: ReplyContext) -> Self {
        Self {
            reply_to: Some(ctx),
            is_forwarded: false,
        }
    }

    pub fn forwarded() -> Self {
        Self {
            reply_to: None,
            is_forwarded: true,
        }
    }
}

/// Insert payload. The server assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_email: String,
    pub receiver_email: String,
    pub sender_role: Role,
    pub message: String,
    pub is_deleted: bool,
    pub is_forwarded: bool,
    pub reply_to_message: Option<String>,
    pub reply_to_sender: Option<String>,
    pub client_ref: Option<String>,
}

impl NewMessage {
    pub fn new(sender: &str, receiver: &str, sender_role: Role, body: &str, extra: &SendExtra) -> Self {
        Self {
            sender_email: sender.to_string(),
            receiver_email: receiver.to_string(),
            sender_role,
            message: body.to_string(),
            is_deleted: false,
            is_forwarded: extra.is_forwarded,
            reply_to_message: extra.reply_to.as_ref().map(|r| r.message.clone()),
            reply_to_sender: extra.reply_to.as_ref().map(|r| r.sender.clone()),
            client_ref: None,
        }
    }

    pub fn with_client_ref(mut self, client_ref: impl Into<String>) -> Self {
        self.client_ref = Some(client_ref.into());
        self
    }

    /// Materialize as a row with the given id and timestamp
    pub fn into_message(self, id: String, created_at: DateTime<Utc>) -> Message {
        Message {
            id,
            sender_email: self.sender_email,
            receiver_email: self.receiver_email,
            sender_role: self.sender_role,
            message: self.message,
            is_deleted: self.is_deleted,
            is_forwarded: self.is_forwarded,
            reply_to_message: self.reply_to_message,
            reply_to_sender: self.reply_to_sender,
            created_at,
            client_ref: self.client_ref,
            optimistic: false,
            sync_state: SyncState::Synced,
        }
    }
}

/// Partial update; only `message` and `is_deleted` are mutable after creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
}

impl MessagePatch {
    pub fn edit(body: impl Into<String>) -> Self {
        Self {
            message: Some(body.into()),
            is_deleted: None,
        }
    }

    pub fn soft_delete() -> Self {
        Self {
            message: None,
            is_deleted: Some(true),
        }
    }

    pub fn apply(&self, msg: &mut Message) {
        if let Some(body) = &self.message {
            msg.message = body.clone();
        }
        if self.is_deleted == Some(true) {
            msg.is_deleted = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        NewMessage::new("a@x.io", "b@x.io", Role::Admin, "hi", &SendExtra::default())
            .into_message("m1".to_string(), Utc::now())
    }

    #[test]
    fn test_is_between_either_direction() {
        let m = sample();
        assert!(m.is_between("a@x.io", "b@x.io"));
        assert!(m.is_between("b@x.io", "a@x.io"));
        assert!(!m.is_between("a@x.io", "c@x.io"));
    }

    #[test]
    fn test_merge_never_undeletes() {
        let mut local = sample();
        local.is_deleted = true;
        local.sync_state = SyncState::Unsynced;
        let server = sample();
        local.merge_from(&server);
        assert!(local.is_deleted);
        // Local delete never reached the server
        assert_eq!(local.sync_state, SyncState::Unsynced);

        let mut confirmed = server.clone();
        confirmed.is_deleted = true;
        local.merge_from(&confirmed);
        assert_eq!(local.sync_state, SyncState::Synced);
    }

    #[test]
    fn test_merge_clears_unsynced_edit() {
        let mut local = sample();
        local.message = "local edit".to_string();
        local.sync_state = SyncState::Unsynced;
        local.merge_from(&sample());
        assert_eq!(local.message, "hi");
        assert_eq!(local.sync_state, SyncState::Synced);
    }

    #[test]
    fn test_optimistic_flag_wire_name() {
        let mut m = sample();
        m.optimistic = true;
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["_optimistic"], serde_json::Value::Bool(true));
        let back: Message = serde_json::from_value(v).unwrap();
        assert!(back.optimistic);
    }

    #[test]
    fn test_reply_sender_resolution() {
        let me = Identity::new("1", "a@x.io", Role::Admin, None);
        let contacts = vec![Contact {
            id: "2".to_string(),
            name: "Bea".to_string(),
            email: "b@x.io".to_string(),
            role: Role::Worker,
            domain: Some("HR".to_string()),
        }];
        let mine = sample();
        assert_eq!(ReplyContext::for_message(&mine, &me, "Ann", &contacts).sender, "Ann");

        let mut theirs = sample();
        theirs.sender_email = "b@x.io".to_string();
        assert_eq!(ReplyContext::for_message(&theirs, &me, "Ann", &contacts).sender, "Bea");

        theirs.sender_email = "ghost@x.io".to_string();
        assert_eq!(
            ReplyContext::for_message(&theirs, &me, "Ann", &contacts).sender,
            "ghost@x.io"
        );
    }

    #[test]
    fn test_patch_only_touches_mutable_fields() {
        let mut m = sample();
        let created = m.created_at;
        MessagePatch::soft_delete().apply(&mut m);
        assert!(m.is_deleted);
        assert_eq!(m.message, "hi");
        assert_eq!(m.created_at, created);
    }
}
