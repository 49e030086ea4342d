/// History loading for the selected conversation
use crate::backend::MessageBackend;
use crate::conversation::{derive_conversation, ConversationKey};
use crate::message::Message;
use crate::message_list::{merge_history, SharedMessages};
use crate::snapshot_store::SnapshotStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a history load did to the message list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Server history applied
    Loaded(usize),
    /// Server unavailable; the cached snapshot was applied
    FromCache(usize),
    /// Server unavailable and nothing cached; the list stays empty
    Failed,
    /// The selection changed while loading; nothing applied
    Stale,
}

pub struct ConversationStore {
    backend: Arc<dyn MessageBackend>,
    messages: SharedMessages,
    cache: Option<SnapshotStore>,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn MessageBackend>, messages: SharedMessages, cache: Option<SnapshotStore>) -> Self {
        Self {
            backend,
            messages,
            cache,
        }
    }

    /// Load the history between `me` and `contact_email` into the list, if
    /// `generation` is still current when the fetch resolves.
    pub async fn load(&self, me: &str, contact_email: &str, generation: u64) -> LoadOutcome {
        let key = ConversationKey::new(me, contact_email);

        match self.backend.query_conversation(me, contact_email).await {
            Ok(rows) => {
                let history = derive_conversation(&rows, &key);
                let count = history.len();

                if !self.apply(generation, history).await {
                    debug!("Discarding stale history for {}", key);
                    return LoadOutcome::Stale;
                }
                // Cache the merged list so changes held during the fetch are kept
                let snap = self.messages.snapshot().await;
                if snap.generation == generation {
                    self.remember(&key, &snap.messages);
                }
                info!("Loaded {} messages for {}", count, key);
                LoadOutcome::Loaded(count)
            }
            Err(e) => {
                warn!("History load for {} failed: {}", key, e);
                let cached = self.cached(&key);
                let outcome = match &cached {
                    Some(rows) => LoadOutcome::FromCache(rows.len()),
                    None => LoadOutcome::Failed,
                };
                if !self.apply(generation, cached.unwrap_or_default()).await {
                    return LoadOutcome::Stale;
                }
                outcome
            }
        }
    }

    /// Persist the confirmed part of a list as the conversation's snapshot
    pub fn remember(&self, key: &ConversationKey, messages: &[Message]) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(key, messages) {
                warn!("Could not cache snapshot for {}: {}", key, e);
            }
        }
    }

    fn cached(&self, key: &ConversationKey) -> Option<Vec<Message>> {
        let cache = self.cache.as_ref()?;
        match cache.load(key) {
            Ok(found) => found.map(|rows| derive_conversation(&rows, key)),
            Err(e) => {
                warn!("Could not read cached snapshot for {}: {}", key, e);
                None
            }
        }
    }

    async fn apply(&self, generation: u64, history: Vec<Message>) -> bool {
        self.messages
            .update_if(generation, move |prev, pending| merge_history(prev, history, pending))
            .await
            .is_some()
    }
}
