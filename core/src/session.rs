/// Chat session: the messaging core as seen from a UI shell
///
/// Owns the caller identity, the resolved contacts, the current selection and
/// the shared message list, and routes every operation to the component that
/// implements it.
use crate::backend::{Directory, MessageBackend};
use crate::config::ChatConfig;
use crate::contact_resolver::{Contact, ContactResolver};
use crate::conversation::{summarize, ConversationKey};
use crate::conversation_store::{ConversationStore, LoadOutcome};
use crate::error::{ChatError, Result};
use crate::identity::Identity;
use crate::message::{Message, ReplyContext, SendExtra, SyncState};
use crate::message_list::SharedMessages;
use crate::messenger_types::{ChatEvent, ConversationSummary};
use crate::mutation::{ActiveConversation, MessageMutationService};
use crate::permissions::can_message;
use crate::pipeline::OptimisticMessagePipeline;
use crate::realtime::{ChannelState, RealtimeChannelManager};
use crate::render::{group_by_day, offset_from_minutes, today_at, DayBucket};
use crate::snapshot_store::SnapshotStore;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// The selected contact and the list generation created for it
#[derive(Debug, Clone)]
struct Selection {
    contact: Contact,
    generation: u64,
}

pub struct ChatSession {
    identity: Identity,
    config: ChatConfig,
    resolver: ContactResolver,
    store: ConversationStore,
    channel: RealtimeChannelManager,
    pipeline: Arc<OptimisticMessagePipeline>,
    mutations: MessageMutationService,
    messages: SharedMessages,
    contacts: RwLock<Vec<Contact>>,
    self_info: RwLock<Option<Contact>>,
    selected: RwLock<Option<Selection>>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatSession {
    /// Build a session for `identity`. Opens the snapshot cache when
    /// `config.data_dir` is set.
    pub fn new(
        identity: Identity,
        backend: Arc<dyn MessageBackend>,
        directory: Arc<dyn Directory>,
        config: ChatConfig,
    ) -> Result<Self> {
        let cache = match &config.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(ChatError::Io)?;
                Some(SnapshotStore::new(dir)?)
            }
            None => None,
        };

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let messages = SharedMessages::new();
        let pipeline = Arc::new(OptimisticMessagePipeline::new(
            backend.clone(),
            messages.clone(),
            events.clone(),
            config.temp_id_prefix.clone(),
        ));

        info!("Chat session for {} ({})", identity.email, identity.role);

        Ok(Self {
            resolver: ContactResolver::new(directory),
            store: ConversationStore::new(backend.clone(), messages.clone(), cache),
            channel: RealtimeChannelManager::new(
                backend.clone(),
                messages.clone(),
                events.clone(),
                config.text_dedup_fallback,
            ),
            mutations: MessageMutationService::new(
                backend,
                messages.clone(),
                events.clone(),
                pipeline.clone(),
            ),
            pipeline,
            messages,
            contacts: RwLock::new(Vec::new()),
            self_info: RwLock::new(None),
            selected: RwLock::new(None),
            events,
            identity,
            config,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Re-read the caller's own row and allowed contacts from the directory
    pub async fn refresh_contacts(&self) -> Vec<Contact> {
        let me = self.resolver.fetch_self(&self.identity).await;
        *self.self_info.write().await = me;

        let contacts = self.resolver.resolve(&self.identity).await;
        *self.contacts.write().await = contacts.clone();
        let _ = self.events.send(ChatEvent::ContactsLoaded {
            count: contacts.len(),
        });
        contacts
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.contacts.read().await.clone()
    }

    pub async fn self_info(&self) -> Option<Contact> {
        self.self_info.read().await.clone()
    }

    /// Own name from the directory, or the email when unknown
    pub async fn display_name(&self) -> String {
        match self.self_info.read().await.as_ref() {
            Some(c) => c.display_name().to_string(),
            None => self.identity.email.clone(),
        }
    }

    /// Select `contact` (or clear the selection). Tears down the previous
    /// channel, subscribes to the new pair and loads its history.
    pub async fn select_contact(&self, contact: Option<Contact>) -> Result<LoadOutcome> {
        let Some(contact) = contact else {
            let generation = {
                let mut selected = self.selected.write().await;
                *selected = None;
                self.messages.reset(None).await
            };
            self.channel.switch_to(None, generation).await?;
            return Ok(LoadOutcome::Loaded(0));
        };
        if !can_message(&self.identity, &contact) {
            return Err(ChatError::rejected(format!(
                "{} is not an allowed contact",
                contact.email
            )));
        }

        let key = ConversationKey::new(&self.identity.email, &contact.email);
        // Selection and list generation change together
        let generation = {
            let mut selected = self.selected.write().await;
            let generation = self.messages.reset(Some(key.clone())).await;
            *selected = Some(Selection {
                contact: contact.clone(),
                generation,
            });
            generation
        };
        debug!("Selected {} (generation {})", contact.email, generation);

        // A failed subscription leaves the channel detached; history still loads
        let _ = self.channel.switch_to(Some(key.clone()), generation).await;

        let outcome = self
            .store
            .load(&self.identity.email, &contact.email, generation)
            .await;
        if outcome != LoadOutcome::Stale {
            let count = self.messages.messages().await.len();
            let _ = self.events.send(ChatEvent::ConversationLoaded {
                contact_email: contact.email.clone(),
                count,
            });
            let _ = self.events.send(ChatEvent::MessagesChanged {
                conversation_key: key.to_string(),
            });
        }
        Ok(outcome)
    }

    /// Select one of the resolved contacts by email
    pub async fn select_by_email(&self, email: &str) -> Result<LoadOutcome> {
        let contact = self.find_contact(email).await?;
        self.select_contact(Some(contact)).await
    }

    pub async fn selected_contact(&self) -> Option<Contact> {
        self.selected.read().await.as_ref().map(|s| s.contact.clone())
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.messages.messages().await
    }

    pub async fn channel_state(&self) -> ChannelState {
        self.channel.state().await
    }

    /// Send to the selected contact
    pub async fn send(&self, body: &str, extra: SendExtra) -> Result<Message> {
        let selected = self.selected.read().await.clone();
        let record = self
            .pipeline
            .send(
                &self.identity,
                selected.as_ref().map(|s| &s.contact),
                selected.as_ref().map_or(0, |s| s.generation),
                body,
                extra,
            )
            .await?;

        if let Some(key) = self.messages.conversation().await {
            let list = self.messages.messages().await;
            self.store.remember(&key, &list);
        }
        Ok(record)
    }

    /// Quote context for replying to message `id`
    pub async fn reply_context(&self, id: &str) -> Result<ReplyContext> {
        let msg = self
            .messages
            .find(id)
            .await
            .ok_or_else(|| ChatError::rejected("unknown message"))?;
        if msg.is_deleted {
            return Err(ChatError::rejected("cannot reply to a deleted message"));
        }
        let name = self.display_name().await;
        let contacts = self.contacts.read().await;
        Ok(ReplyContext::for_message(&msg, &self.identity, &name, &contacts))
    }

    /// Send `body` as a reply quoting message `id`
    pub async fn reply(&self, id: &str, body: &str) -> Result<Message> {
        let ctx = self.reply_context(id).await?;
        self.send(body, SendExtra::reply(ctx)).await
    }

    pub async fn edit(&self, id: &str, new_body: &str) -> Result<SyncState> {
        self.mutations.edit(&self.identity, id, new_body).await
    }

    pub async fn delete(&self, id: &str) -> Result<SyncState> {
        self.mutations.soft_delete(&self.identity, id).await
    }

    /// Forward message `id` to the contact with `target_email`
    pub async fn forward(&self, id: &str, target_email: &str) -> Result<Message> {
        let target = self.find_contact(target_email).await?;
        let selected = self.selected.read().await.clone();
        let active = selected.as_ref().map(|s| ActiveConversation {
            contact: &s.contact,
            generation: s.generation,
        });
        self.mutations
            .forward(&self.identity, id, &target, active)
            .await
    }

    /// Day-bucketed view of the active conversation
    pub async fn render(&self) -> Vec<DayBucket> {
        let offset = offset_from_minutes(self.config.utc_offset_minutes);
        let list = self.messages.messages().await;
        group_by_day(&list, &self.identity.email, today_at(offset), offset)
    }

    /// Contact-list preview of the active conversation
    pub async fn summary(&self) -> Option<ConversationSummary> {
        let snap = self.messages.snapshot().await;
        let key = snap.conversation?;
        summarize(&key, &self.identity.email, &snap.messages)
    }

    /// Drop the selection and release the realtime channel
    pub async fn close(&self) {
        {
            let mut selected = self.selected.write().await;
            *selected = None;
            self.messages.reset(None).await;
        }
        self.channel.detach().await;
        info!("Chat session for {} closed", self.identity.email);
    }

    async fn find_contact(&self, email: &str) -> Result<Contact> {
        self.contacts
            .read()
            .await
            .iter()
            .find(|c| c.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or_else(|| ChatError::rejected(format!("{} is not an allowed contact", email)))
    }
}
