/// Realtime channel management
///
/// One change-feed subscription at a time, scoped to the active conversation.
/// Switching tears the old channel down (pump aborted, server side released)
/// before the next one is requested.
use crate::backend::{ChangeEvent, MessageBackend, Subscription, SubscriptionId};
use crate::conversation::ConversationKey;
use crate::error::Result;
use crate::message::Message;
use crate::message_list::{merge_update, remove_by_id, upsert_confirmed, Pending, SharedMessages};
use crate::messenger_types::ChatEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of the realtime channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "conversation", rename_all = "snake_case")]
pub enum ChannelState {
    /// No subscription
    Detached,
    /// Handshake in progress
    Subscribing(ConversationKey),
    /// Receiving events
    Active(ConversationKey),
}

struct OpenChannel {
    id: SubscriptionId,
    pump: JoinHandle<()>,
}

struct Inner {
    state: ChannelState,
    channel: Option<OpenChannel>,
}

pub struct RealtimeChannelManager {
    backend: Arc<dyn MessageBackend>,
    messages: SharedMessages,
    events: broadcast::Sender<ChatEvent>,
    text_fallback: bool,
    inner: Mutex<Inner>,
}

impl RealtimeChannelManager {
    pub fn new(
        backend: Arc<dyn MessageBackend>,
        messages: SharedMessages,
        events: broadcast::Sender<ChatEvent>,
        text_fallback: bool,
    ) -> Self {
        Self {
            backend,
            messages,
            events,
            text_fallback,
            inner: Mutex::new(Inner {
                state: ChannelState::Detached,
                channel: None,
            }),
        }
    }

    pub async fn state(&self) -> ChannelState {
        self.inner.lock().await.state.clone()
    }

    /// Move the channel to `key` for list generation `generation`.
    ///
    /// Switches are serialized. A switch whose generation is no longer current
    /// (the user picked another contact meanwhile) is a no-op: the newer
    /// switch owns the channel.
    pub async fn switch_to(&self, key: Option<ConversationKey>, generation: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if self.messages.generation().await != generation {
            debug!("Skipping channel switch: selection changed");
            return Ok(());
        }
        self.teardown(&mut inner).await;

        let Some(key) = key else {
            return Ok(());
        };

        self.set_state(&mut inner, ChannelState::Subscribing(key.clone()));
        let sub = match self.backend.subscribe(&key).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!("Subscription to {} failed: {}", key, e);
                self.set_state(&mut inner, ChannelState::Detached);
                return Err(e);
            }
        };

        if self.messages.generation().await != generation {
            debug!("Selection changed during handshake for {}, releasing", key);
            self.release(sub.id).await;
            self.set_state(&mut inner, ChannelState::Detached);
            return Ok(());
        }

        let Subscription { id, events } = sub;
        let pump = tokio::spawn(pump_events(
            events,
            key.clone(),
            generation,
            self.messages.clone(),
            self.events.clone(),
            self.text_fallback,
        ));
        inner.channel = Some(OpenChannel { id, pump });
        self.set_state(&mut inner, ChannelState::Active(key.clone()));
        info!("Realtime channel active for {}", key);
        Ok(())
    }

    /// Tear down any open channel
    pub async fn detach(&self) {
        let mut inner = self.inner.lock().await;
        self.teardown(&mut inner).await;
    }

    async fn teardown(&self, inner: &mut Inner) {
        if let Some(open) = inner.channel.take() {
            open.pump.abort();
            self.release(open.id).await;
            debug!("Realtime channel {:?} closed", open.id);
        }
        if inner.state != ChannelState::Detached {
            self.set_state(inner, ChannelState::Detached);
        }
    }

    async fn release(&self, id: SubscriptionId) {
        if let Err(e) = self.backend.unsubscribe(id).await {
            warn!("Unsubscribe {:?} failed: {}", id, e);
        }
    }

    fn set_state(&self, inner: &mut Inner, state: ChannelState) {
        inner.state = state.clone();
        let _ = self.events.send(ChatEvent::ChannelStateChanged { state });
    }
}

/// Whether an event can concern conversation `key`. A DELETE carries only
/// an id, so it always can.
fn is_relevant(event: &ChangeEvent, key: &ConversationKey) -> bool {
    match event {
        ChangeEvent::Insert { record } | ChangeEvent::Update { record } => key.matches(record),
        ChangeEvent::Delete { .. } => true,
    }
}

/// Next list after one change event. Events for other pairs are ignored.
/// UPDATEs and DELETEs for ids not loaded yet are held in `pending` until
/// the history merge.
pub fn apply_change(
    prev: &[Message],
    pending: &mut Pending,
    event: &ChangeEvent,
    key: &ConversationKey,
    text_fallback: bool,
) -> Vec<Message> {
    let known = |id: &str| prev.iter().any(|m| m.id == id);
    match event {
        ChangeEvent::Insert { record } if key.matches(record) => {
            if pending.is_deleted(&record.id) {
                return prev.to_vec();
            }
            let next = upsert_confirmed(prev, record, text_fallback);
            match pending.take_update(&record.id) {
                Some(update) => merge_update(&next, &update),
                None => next,
            }
        }
        ChangeEvent::Update { record } if key.matches(record) => {
            if known(&record.id) {
                merge_update(prev, record)
            } else {
                pending.stash_update(record);
                prev.to_vec()
            }
        }
        ChangeEvent::Delete { id } => {
            if known(id) {
                remove_by_id(prev, id)
            } else {
                pending.mark_deleted(id);
                prev.to_vec()
            }
        }
        ChangeEvent::Insert { .. } | ChangeEvent::Update { .. } => prev.to_vec(),
    }
}

async fn pump_events(
    mut rx: mpsc::UnboundedReceiver<ChangeEvent>,
    key: ConversationKey,
    generation: u64,
    messages: SharedMessages,
    events: broadcast::Sender<ChatEvent>,
    text_fallback: bool,
) {
    while let Some(event) = rx.recv().await {
        if !is_relevant(&event, &key) {
            continue;
        }
        let changed = messages
            .update_if(generation, |prev, pending| {
                apply_change(prev, pending, &event, &key, text_fallback)
            })
            .await;
        match changed {
            None => {
                debug!("Channel for {} is stale, stopping pump", key);
                break;
            }
            Some(true) => {
                let _ = events.send(ChatEvent::MessagesChanged {
                    conversation_key: key.to_string(),
                });
            }
            Some(false) => {}
        }
    }
    debug!("Event pump for {} finished", key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use crate::message::{NewMessage, SendExtra};
    use chrono::Utc;

    fn record(id: &str, from: &str, to: &str) -> Message {
        NewMessage::new(from, to, Role::Worker, "body", &SendExtra::default())
            .into_message(id.to_string(), Utc::now())
    }

    #[test]
    fn test_insert_for_other_pair_is_ignored() {
        let key = ConversationKey::new("a@o.io", "b@o.io");
        let event = ChangeEvent::Insert {
            record: record("1", "a@o.io", "c@o.io"),
        };
        assert!(apply_change(&[], &mut Pending::default(), &event, &key, true).is_empty());
        assert!(!is_relevant(&event, &key));
    }

    #[test]
    fn test_update_for_other_pair_is_not_relevant() {
        let key = ConversationKey::new("a@o.io", "b@o.io");
        let event = ChangeEvent::Update {
            record: record("1", "b@o.io", "c@o.io"),
        };
        assert!(!is_relevant(&event, &key));

        let mut pending = Pending::default();
        assert!(apply_change(&[], &mut pending, &event, &key, true).is_empty());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_changes_for_unloaded_ids_are_held() {
        let key = ConversationKey::new("a@o.io", "b@o.io");
        let mut pending = Pending::default();
        let mut deleted = record("1", "b@o.io", "a@o.io");
        deleted.is_deleted = true;

        let list = apply_change(&[], &mut pending, &ChangeEvent::Update { record: deleted }, &key, true);
        assert!(list.is_empty());
        let list = apply_change(&list, &mut pending, &ChangeEvent::Delete { id: "2".to_string() }, &key, true);
        assert!(list.is_empty());

        // A late INSERT echo picks up the held update; a deleted id stays out
        let list = apply_change(
            &list,
            &mut pending,
            &ChangeEvent::Insert { record: record("1", "b@o.io", "a@o.io") },
            &key,
            true,
        );
        assert!(list[0].is_deleted);
        let list = apply_change(
            &list,
            &mut pending,
            &ChangeEvent::Insert { record: record("2", "b@o.io", "a@o.io") },
            &key,
            true,
        );
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_update_then_delete() {
        let key = ConversationKey::new("a@o.io", "b@o.io");
        let original = record("1", "b@o.io", "a@o.io");
        let mut pending = Pending::default();
        let list = apply_change(&[], &mut pending, &ChangeEvent::Insert { record: original.clone() }, &key, true);

        let mut edited = original.clone();
        edited.message = "edited".to_string();
        let list = apply_change(&list, &mut pending, &ChangeEvent::Update { record: edited }, &key, true);
        assert_eq!(list[0].message, "edited");

        let list = apply_change(&list, &mut pending, &ChangeEvent::Delete { id: "1".to_string() }, &key, true);
        assert!(list.is_empty());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_state_serializes_with_conversation() {
        let key = ConversationKey::new("a@o.io", "b@o.io");
        let v = serde_json::to_value(ChannelState::Active(key)).unwrap();
        assert_eq!(v["state"], "active");
        assert!(v["conversation"].is_object());
    }
}
