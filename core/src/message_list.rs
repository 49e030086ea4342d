/// The active conversation's message list
///
/// This is the only shared mutable state in a session. Every change is a pure
/// function from the previous list to the next one, applied under one write
/// lock. Each reset bumps a generation counter; writers that captured an older
/// generation are ignored, which is how stale history fetches, stale channel
/// events and late send confirmations are discarded after a contact switch.
use crate::conversation::{sort_chronologically, ConversationKey};
use crate::message::{Message, SyncState};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Remote changes for ids not in the list yet, held until history lands
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pending {
    updates: HashMap<String, Message>,
    deleted: HashSet<String>,
}

impl Pending {
    /// Keep the newest UPDATE per id
    pub fn stash_update(&mut self, record: &Message) {
        match self.updates.get_mut(&record.id) {
            Some(held) => held.merge_from(record),
            None => {
                self.updates.insert(record.id.clone(), record.clone());
            }
        }
    }

    pub fn mark_deleted(&mut self, id: &str) {
        self.updates.remove(id);
        self.deleted.insert(id.to_string());
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.deleted.contains(id)
    }

    pub fn take_update(&mut self, id: &str) -> Option<Message> {
        self.updates.remove(id)
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deleted.is_empty()
    }
}

/// Point-in-time copy of the list
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub generation: u64,
    pub conversation: Option<ConversationKey>,
    pub messages: Vec<Message>,
    /// Scoped to `generation`; cleared on reset
    pub pending: Pending,
}

#[derive(Clone, Default)]
pub struct SharedMessages {
    inner: Arc<RwLock<Snapshot>>,
}

impl SharedMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the list for a new conversation and return the new generation
    pub async fn reset(&self, conversation: Option<ConversationKey>) -> u64 {
        let mut snap = self.inner.write().await;
        snap.generation += 1;
        snap.conversation = conversation;
        snap.messages.clear();
        snap.pending = Pending::default();
        snap.generation
    }

    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }

    pub async fn conversation(&self) -> Option<ConversationKey> {
        self.inner.read().await.conversation.clone()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.inner.read().await.clone()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.read().await.messages.clone()
    }

    pub async fn find(&self, id: &str) -> Option<Message> {
        self.inner
            .read()
            .await
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    /// Replace the list with `f(prev)` if `generation` is still current.
    /// Returns whether the change was applied.
    pub async fn apply_if<F>(&self, generation: u64, f: F) -> bool
    where
        F: FnOnce(&[Message]) -> Vec<Message>,
    {
        let mut snap = self.inner.write().await;
        if snap.generation != generation {
            return false;
        }
        let next = f(&snap.messages);
        snap.messages = next;
        true
    }

    /// Like `apply_if`, with access to the generation's pending remote changes.
    /// `None` when `generation` is stale, otherwise whether the list changed.
    pub async fn update_if<F>(&self, generation: u64, f: F) -> Option<bool>
    where
        F: FnOnce(&[Message], &mut Pending) -> Vec<Message>,
    {
        let mut snap = self.inner.write().await;
        if snap.generation != generation {
            return None;
        }
        let Snapshot {
            messages, pending, ..
        } = &mut *snap;
        let next = f(messages, pending);
        let changed = next != *messages;
        *messages = next;
        Some(changed)
    }

    /// Replace the list with `f(prev)` regardless of generation
    pub async fn apply<F>(&self, f: F)
    where
        F: FnOnce(&[Message]) -> Vec<Message>,
    {
        let mut snap = self.inner.write().await;
        let next = f(&snap.messages);
        snap.messages = next;
    }
}

fn sorted(mut list: Vec<Message>) -> Vec<Message> {
    sort_chronologically(&mut list);
    list
}

/// Add a message at the tail (then keep chronological order)
pub fn append(prev: &[Message], msg: Message) -> Vec<Message> {
    let mut next = prev.to_vec();
    next.push(msg);
    sorted(next)
}

pub fn remove_by_id(prev: &[Message], id: &str) -> Vec<Message> {
    prev.iter().filter(|m| m.id != id).cloned().collect()
}

/// Field-merge an authoritative record into the entry with the same id.
/// Unknown ids leave the list unchanged.
pub fn merge_update(prev: &[Message], record: &Message) -> Vec<Message> {
    let next = prev
        .iter()
        .map(|m| {
            if m.id == record.id {
                let mut merged = m.clone();
                merged.merge_from(record);
                merged
            } else {
                m.clone()
            }
        })
        .collect();
    sorted(next)
}

/// Apply a local change to the entry with `id`
pub fn patch_by_id<F>(prev: &[Message], id: &str, f: F) -> Vec<Message>
where
    F: Fn(&mut Message),
{
    prev.iter()
        .map(|m| {
            let mut m = m.clone();
            if m.id == id {
                f(&mut m);
            }
            m
        })
        .collect()
}

pub fn mark_sync_state(prev: &[Message], id: &str, state: SyncState) -> Vec<Message> {
    patch_by_id(prev, id, |m| m.sync_state = state)
}

/// Position of the optimistic placeholder an incoming record confirms.
/// A record carrying a correlation id only ever matches by that id; the
/// sender+body heuristic applies only to records without one.
fn placeholder_for(prev: &[Message], record: &Message, text_fallback: bool) -> Option<usize> {
    match &record.client_ref {
        Some(r) => prev
            .iter()
            .position(|m| m.optimistic && (m.client_ref.as_ref() == Some(r) || &m.id == r)),
        None if text_fallback => prev.iter().position(|m| {
            m.optimistic && m.sender_email == record.sender_email && m.message == record.message
        }),
        None => None,
    }
}

fn confirmed(record: &Message) -> Message {
    let mut m = record.clone();
    m.optimistic = false;
    m.sync_state = SyncState::Synced;
    m
}

/// Realtime INSERT: idempotent upsert, then placeholder dedup, then append
pub fn upsert_confirmed(prev: &[Message], record: &Message, text_fallback: bool) -> Vec<Message> {
    if prev.iter().any(|m| m.id == record.id) {
        return merge_update(prev, record);
    }
    let mut next = prev.to_vec();
    match placeholder_for(prev, record, text_fallback) {
        Some(pos) => next[pos] = confirmed(record),
        None => next.push(confirmed(record)),
    }
    sorted(next)
}

/// Send completion: swap the placeholder `temp_id` for the stored record.
/// If the realtime echo already confirmed it, this converges on the same entry.
pub fn confirm_optimistic(prev: &[Message], temp_id: &str, record: &Message) -> Vec<Message> {
    let placeholder = prev.iter().position(|m| m.id == temp_id);
    let existing = prev.iter().position(|m| m.id == record.id);

    match (placeholder, existing) {
        (Some(pos), None) => {
            let mut next = prev.to_vec();
            next[pos] = confirmed(record);
            sorted(next)
        }
        (Some(_), Some(_)) => merge_update(&remove_by_id(prev, temp_id), record),
        (None, Some(_)) => merge_update(prev, record),
        (None, None) => append(prev, confirmed(record)),
    }
}

/// Merge a freshly loaded history into whatever arrived while it was in flight.
/// Live entries win over their history copy, held UPDATEs are applied and
/// ids deleted meanwhile are dropped.
pub fn merge_history(prev: &[Message], history: Vec<Message>, pending: &mut Pending) -> Vec<Message> {
    let mut next: Vec<Message> = history
        .into_iter()
        .filter_map(|h| {
            if pending.is_deleted(&h.id) {
                return None;
            }
            let mut m = prev.iter().find(|live| live.id == h.id).cloned().unwrap_or(h);
            if let Some(update) = pending.take_update(&m.id) {
                m.merge_from(&update);
            }
            Some(m)
        })
        .collect();
    for m in prev {
        let known = next.iter().any(|h| {
            h.id == m.id || (m.optimistic && m.client_ref.is_some() && h.client_ref == m.client_ref)
        });
        if !known {
            next.push(m.clone());
        }
    }
    sorted(next)
}
