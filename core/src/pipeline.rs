/// Optimistic send pipeline
///
/// A send shows up in the list before the server has seen it. The placeholder
/// carries a temporary id that doubles as `client_ref`, so both the insert
/// response and the realtime echo can find it.
use crate::backend::MessageBackend;
use crate::contact_resolver::Contact;
use crate::conversation::ConversationKey;
use crate::error::{ChatError, Result};
use crate::identity::Identity;
use crate::message::{Message, NewMessage, SendExtra};
use crate::message_list::{append, confirm_optimistic, remove_by_id, SharedMessages};
use crate::messenger_types::ChatEvent;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info};
use uuid::Uuid;

pub struct OptimisticMessagePipeline {
    backend: Arc<dyn MessageBackend>,
    messages: SharedMessages,
    events: broadcast::Sender<ChatEvent>,
    temp_id_prefix: String,
}

impl OptimisticMessagePipeline {
    pub fn new(
        backend: Arc<dyn MessageBackend>,
        messages: SharedMessages,
        events: broadcast::Sender<ChatEvent>,
        temp_id_prefix: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            messages,
            events,
            temp_id_prefix: temp_id_prefix.into(),
        }
    }

    fn temp_id(&self) -> String {
        format!("{}-{}", self.temp_id_prefix, Uuid::new_v4())
    }

    /// Send `body` to the selected contact with a placeholder in list
    /// generation `generation`. Returns the stored record; on failure the
    /// placeholder is removed again.
    pub async fn send(
        &self,
        identity: &Identity,
        contact: Option<&Contact>,
        generation: u64,
        body: &str,
        extra: SendExtra,
    ) -> Result<Message> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ChatError::rejected("message is empty"));
        }
        let Some(contact) = contact else {
            return Err(ChatError::rejected("no contact selected"));
        };

        let key = ConversationKey::new(&identity.email, &contact.email);
        let temp_id = self.temp_id();
        let payload = NewMessage::new(&identity.email, &contact.email, identity.role, body, &extra)
            .with_client_ref(temp_id.clone());

        let mut placeholder = payload.clone().into_message(temp_id.clone(), Utc::now());
        placeholder.optimistic = true;
        if self
            .messages
            .apply_if(generation, |prev| append(prev, placeholder))
            .await
        {
            self.changed(&key);
        }
        debug!("Sending {} to {}", temp_id, contact.email);

        match self.backend.insert(payload).await {
            Ok(record) => {
                if self
                    .messages
                    .apply_if(generation, |prev| confirm_optimistic(prev, &temp_id, &record))
                    .await
                {
                    self.changed(&key);
                }
                info!("Message {} confirmed as {}", temp_id, record.id);
                Ok(record)
            }
            Err(e) => {
                error!("Send to {} failed: {}", contact.email, e);
                if self
                    .messages
                    .apply_if(generation, |prev| remove_by_id(prev, &temp_id))
                    .await
                {
                    self.changed(&key);
                }
                let _ = self.events.send(ChatEvent::SendFailed {
                    temp_id,
                    error: e.to_string(),
                });
                Err(ChatError::SendPersist(e.to_string()))
            }
        }
    }

    /// Persist without a placeholder, for conversations that are not on screen
    pub async fn send_detached(
        &self,
        identity: &Identity,
        contact: &Contact,
        body: &str,
        extra: SendExtra,
    ) -> Result<Message> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ChatError::rejected("message is empty"));
        }
        let payload = NewMessage::new(&identity.email, &contact.email, identity.role, body, &extra)
            .with_client_ref(self.temp_id());
        self.backend.insert(payload).await.map_err(|e| {
            error!("Send to {} failed: {}", contact.email, e);
            ChatError::SendPersist(e.to_string())
        })
    }

    fn changed(&self, key: &ConversationKey) {
        let _ = self.events.send(ChatEvent::MessagesChanged {
            conversation_key: key.to_string(),
        });
    }
}
