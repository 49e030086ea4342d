/// Edit, soft delete and forward
///
/// Edits and deletes are applied locally first. A failed write is not rolled
/// back; the message is flagged `Unsynced` so the UI can show it diverged.
use crate::backend::MessageBackend;
use crate::contact_resolver::Contact;
use crate::error::{ChatError, Result};
use crate::identity::Identity;
use crate::message::{Message, MessagePatch, SendExtra, SyncState};
use crate::message_list::{mark_sync_state, patch_by_id, SharedMessages};
use crate::messenger_types::ChatEvent;
use crate::permissions::{can_message, role_permissions};
use crate::pipeline::OptimisticMessagePipeline;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// The conversation currently on screen, for forwards that land in it
pub struct ActiveConversation<'a> {
    pub contact: &'a Contact,
    pub generation: u64,
}

pub struct MessageMutationService {
    backend: Arc<dyn MessageBackend>,
    messages: SharedMessages,
    events: broadcast::Sender<ChatEvent>,
    pipeline: Arc<OptimisticMessagePipeline>,
}

impl MessageMutationService {
    pub fn new(
        backend: Arc<dyn MessageBackend>,
        messages: SharedMessages,
        events: broadcast::Sender<ChatEvent>,
        pipeline: Arc<OptimisticMessagePipeline>,
    ) -> Self {
        Self {
            backend,
            messages,
            events,
            pipeline,
        }
    }

    /// Replace the body of one of the caller's own messages
    pub async fn edit(&self, identity: &Identity, id: &str, new_body: &str) -> Result<SyncState> {
        let body = new_body.trim().to_string();
        if body.is_empty() {
            return Err(ChatError::rejected("message is empty"));
        }
        let current = self.confirmed(id).await?;
        if !identity.is_self(&current.sender_email) {
            return Err(ChatError::rejected("only the sender can edit a message"));
        }
        if current.message == body {
            return Err(ChatError::rejected("message unchanged"));
        }

        let local = body.clone();
        self.messages
            .apply(|prev| patch_by_id(prev, id, |m| m.message = local.clone()))
            .await;
        self.changed().await;

        match self.backend.update(id, MessagePatch::edit(body)).await {
            Ok(()) => self.synced(&current).await,
            Err(e) => self.unsynced(id, "edit", e).await,
        }
    }

    /// Mark a message deleted. The body stays stored but is never rendered.
    pub async fn soft_delete(&self, identity: &Identity, id: &str) -> Result<SyncState> {
        let current = self.confirmed(id).await?;
        if !identity.is_self(&current.sender_email) && !role_permissions(identity.role).can_delete_messages {
            return Err(ChatError::rejected("not allowed to delete this message"));
        }

        self.messages
            .apply(|prev| patch_by_id(prev, id, |m| m.is_deleted = true))
            .await;
        self.changed().await;

        match self.backend.update(id, MessagePatch::soft_delete()).await {
            Ok(()) => self.synced(&current).await,
            Err(e) => self.unsynced(id, "delete", e).await,
        }
    }

    /// Send a copy of message `id` to `target` as a new, forwarded message
    pub async fn forward(
        &self,
        identity: &Identity,
        id: &str,
        target: &Contact,
        active: Option<ActiveConversation<'_>>,
    ) -> Result<Message> {
        let original = self
            .messages
            .find(id)
            .await
            .ok_or_else(|| ChatError::rejected("unknown message"))?;
        if original.is_deleted {
            return Err(ChatError::rejected("cannot forward a deleted message"));
        }
        if !can_message(identity, target) {
            return Err(ChatError::rejected(format!(
                "{} is not an allowed contact",
                target.email
            )));
        }

        let forwarded = match active {
            Some(a) if a.contact.email == target.email => {
                self.pipeline
                    .send(identity, Some(target), a.generation, &original.message, SendExtra::forwarded())
                    .await?
            }
            _ => {
                self.pipeline
                    .send_detached(identity, target, &original.message, SendExtra::forwarded())
                    .await?
            }
        };
        info!("Forwarded {} to {} as {}", id, target.email, forwarded.id);
        Ok(forwarded)
    }

    /// Existing, confirmed, not deleted message with `id`
    async fn confirmed(&self, id: &str) -> Result<Message> {
        let current = self
            .messages
            .find(id)
            .await
            .ok_or_else(|| ChatError::rejected("unknown message"))?;
        if current.optimistic {
            return Err(ChatError::rejected("message is not confirmed yet"));
        }
        if current.is_deleted {
            return Err(ChatError::rejected("message was deleted"));
        }
        Ok(current)
    }

    async fn synced(&self, before: &Message) -> Result<SyncState> {
        if before.sync_state == SyncState::Unsynced {
            self.messages
                .apply(|prev| mark_sync_state(prev, &before.id, SyncState::Synced))
                .await;
            self.changed().await;
        }
        Ok(SyncState::Synced)
    }

    async fn unsynced(&self, id: &str, op: &str, e: ChatError) -> Result<SyncState> {
        let err = ChatError::MutationPersist(format!("{} of {}: {}", op, id, e));
        warn!("{}", err);
        self.messages
            .apply(|prev| mark_sync_state(prev, id, SyncState::Unsynced))
            .await;
        let _ = self.events.send(ChatEvent::MutationUnsynced {
            message_id: id.to_string(),
            error: err.to_string(),
        });
        self.changed().await;
        Ok(SyncState::Unsynced)
    }

    async fn changed(&self) {
        if let Some(key) = self.messages.conversation().await {
            let _ = self.events.send(ChatEvent::MessagesChanged {
                conversation_key: key.to_string(),
            });
        }
    }
}
