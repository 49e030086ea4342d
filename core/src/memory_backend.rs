/// In-process message store, change feed and directory
///
/// Behaves like the hosted backend the core is written against: the server
/// assigns ids and timestamps, every write is fanned out to all open
/// subscriptions, and `client_ref` is echoed back. Failure switches and
/// history gates let callers reproduce network errors and slow fetches.
use crate::backend::{ChangeEvent, Directory, DirectoryFilter, MessageBackend, Subscription, SubscriptionId};
use crate::contact_resolver::Contact;
use crate::conversation::{derive_conversation, ConversationKey};
use crate::error::{ChatError, Result};
use crate::identity::Role;
use crate::message::{Message, MessagePatch, NewMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct State {
    rows: Vec<Message>,
    last_created_at: Option<DateTime<Utc>>,
    next_subscription: u64,
    subscribers: HashMap<SubscriptionId, mpsc::UnboundedSender<ChangeEvent>>,
    tables: HashMap<Role, Vec<Contact>>,
    failing_tables: HashSet<Role>,
    failing_inserts: usize,
    fail_updates: bool,
    fail_history: bool,
    fail_subscribe: bool,
    drop_client_ref: bool,
    history_gates: HashMap<String, Arc<Notify>>,
    response_gates: HashMap<String, Arc<Notify>>,
    history_reads: usize,
    insert_gate: Option<Arc<Notify>>,
}

/// Handle that releases a held request
pub struct Gate {
    notify: Arc<Notify>,
}

impl Gate {
    pub fn release(&self) {
        self.notify.notify_one();
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<RwLock<State>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory row to the table of `contact.role`
    pub async fn add_contact(&self, contact: Contact) {
        let mut st = self.state.write().await;
        st.tables.entry(contact.role).or_default().push(contact);
    }

    /// Make reads of one directory table fail
    pub async fn fail_table(&self, role: Role, failing: bool) {
        let mut st = self.state.write().await;
        if failing {
            st.failing_tables.insert(role);
        } else {
            st.failing_tables.remove(&role);
        }
    }

    /// Make the next `n` inserts fail
    pub async fn fail_next_inserts(&self, n: usize) {
        self.state.write().await.failing_inserts = n;
    }

    pub async fn fail_updates(&self, failing: bool) {
        self.state.write().await.fail_updates = failing;
    }

    pub async fn fail_history(&self, failing: bool) {
        self.state.write().await.fail_history = failing;
    }

    pub async fn fail_subscribe(&self, failing: bool) {
        self.state.write().await.fail_subscribe = failing;
    }

    /// Stop echoing `client_ref`, like a backend without a correlation column
    pub async fn drop_client_ref(&self, drop: bool) {
        self.state.write().await.drop_client_ref = drop;
    }

    /// Hold history fetches involving `email` until the gate is released
    pub async fn hold_history(&self, email: &str) -> Gate {
        let notify = Arc::new(Notify::new());
        self.state
            .write()
            .await
            .history_gates
            .insert(email.to_string(), notify.clone());
        Gate { notify }
    }

    /// Read history involving `email` immediately but hold the response until
    /// the gate is released, so later writes are missing from it
    pub async fn hold_history_response(&self, email: &str) -> Gate {
        let notify = Arc::new(Notify::new());
        self.state
            .write()
            .await
            .response_gates
            .insert(email.to_string(), notify.clone());
        Gate { notify }
    }

    /// Number of history reads served so far
    pub async fn history_reads(&self) -> usize {
        self.state.read().await.history_reads
    }

    /// Hold the next insert until the gate is released
    pub async fn hold_next_insert(&self) -> Gate {
        let notify = Arc::new(Notify::new());
        self.state.write().await.insert_gate = Some(notify.clone());
        Gate { notify }
    }

    /// Write a message as if another client had sent it
    pub async fn inject(&self, record: NewMessage) -> Message {
        let mut st = self.state.write().await;
        Self::store(&mut st, record)
    }

    /// Apply a patch as if another client had made it
    pub async fn inject_update(&self, id: &str, patch: MessagePatch) -> Result<()> {
        let mut st = self.state.write().await;
        Self::patch(&mut st, id, patch)
    }

    /// Remove a row outright (out-of-band deletion)
    pub async fn hard_delete(&self, id: &str) {
        let mut st = self.state.write().await;
        st.rows.retain(|m| m.id != id);
        Self::fan_out(&mut st, ChangeEvent::Delete { id: id.to_string() });
    }

    /// Stored row by id
    pub async fn row(&self, id: &str) -> Option<Message> {
        self.state.read().await.rows.iter().find(|m| m.id == id).cloned()
    }

    pub async fn row_count(&self) -> usize {
        self.state.read().await.rows.len()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.read().await.subscribers.len()
    }

    fn store(st: &mut State, mut record: NewMessage) -> Message {
        if st.drop_client_ref {
            record.client_ref = None;
        }
        // Strictly increasing timestamps keep server order deterministic
        let mut created_at = Utc::now();
        if let Some(last) = st.last_created_at {
            if created_at <= last {
                created_at = last + chrono::Duration::microseconds(1);
            }
        }
        st.last_created_at = Some(created_at);

        let msg = record.into_message(Uuid::new_v4().to_string(), created_at);
        st.rows.push(msg.clone());
        Self::fan_out(st, ChangeEvent::Insert { record: msg.clone() });
        msg
    }

    fn patch(st: &mut State, id: &str, patch: MessagePatch) -> Result<()> {
        let row = st
            .rows
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ChatError::Storage(format!("No message with id {}", id)))?;
        patch.apply(row);
        let record = row.clone();
        Self::fan_out(st, ChangeEvent::Update { record });
        Ok(())
    }

    fn fan_out(st: &mut State, event: ChangeEvent) {
        // Closed receivers are pruned here
        st.subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
    }
}

/// First gate registered for either participant
fn gate_for(gates: &HashMap<String, Arc<Notify>>, a: &str, b: &str) -> Option<(String, Arc<Notify>)> {
    [a, b]
        .into_iter()
        .find_map(|email| gates.get(email).map(|n| (email.to_string(), n.clone())))
}

#[async_trait]
impl MessageBackend for InMemoryBackend {
    async fn query_conversation(&self, a: &str, b: &str) -> Result<Vec<Message>> {
        let gate = gate_for(&self.state.read().await.history_gates, a, b);
        if let Some((email, notify)) = gate {
            debug!("History fetch for {}/{} held", a, b);
            notify.notified().await;
            // A gate holds one fetch
            self.state.write().await.history_gates.remove(&email);
        }

        let (rows, gate) = {
            let mut st = self.state.write().await;
            if st.fail_history {
                return Err(ChatError::HistoryLoad("messages table unavailable".to_string()));
            }
            st.history_reads += 1;
            (
                derive_conversation(&st.rows, &ConversationKey::new(a, b)),
                gate_for(&st.response_gates, a, b),
            )
        };
        if let Some((email, notify)) = gate {
            debug!("History response for {}/{} held", a, b);
            notify.notified().await;
            self.state.write().await.response_gates.remove(&email);
        }
        Ok(rows)
    }

    async fn insert(&self, record: NewMessage) -> Result<Message> {
        let gate = self.state.write().await.insert_gate.take();
        if let Some(notify) = gate {
            debug!("Insert held");
            notify.notified().await;
        }

        let mut st = self.state.write().await;
        if st.failing_inserts > 0 {
            st.failing_inserts -= 1;
            return Err(ChatError::SendPersist("insert rejected".to_string()));
        }
        Ok(Self::store(&mut st, record))
    }

    async fn update(&self, id: &str, patch: MessagePatch) -> Result<()> {
        let mut st = self.state.write().await;
        if st.fail_updates {
            return Err(ChatError::MutationPersist("update rejected".to_string()));
        }
        Self::patch(&mut st, id, patch)
    }

    async fn subscribe(&self, key: &ConversationKey) -> Result<Subscription> {
        let mut st = self.state.write().await;
        if st.fail_subscribe {
            return Err(ChatError::Subscription(format!("channel chat-{} refused", key)));
        }
        st.next_subscription += 1;
        let id = SubscriptionId(st.next_subscription);
        let (tx, rx) = mpsc::unbounded_channel();
        st.subscribers.insert(id, tx);
        debug!("Opened channel {:?} for {}", id, key);
        Ok(Subscription { id, events: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let mut st = self.state.write().await;
        st.subscribers.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl Directory for InMemoryBackend {
    async fn query_table(&self, role: Role, filter: Option<DirectoryFilter>) -> Result<Vec<Contact>> {
        let st = self.state.read().await;
        if st.failing_tables.contains(&role) {
            return Err(ChatError::Directory(format!("table {} unavailable", role.table_name())));
        }
        Ok(st
            .tables
            .get(&role)
            .map(|rows| {
                rows.iter()
                    .filter(|c| filter.as_ref().map_or(true, |f| f.matches(c)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_self(&self, email: &str, role: Role) -> Result<Option<Contact>> {
        let st = self.state.read().await;
        if st.failing_tables.contains(&role) {
            return Err(ChatError::Directory(format!("table {} unavailable", role.table_name())));
        }
        Ok(st
            .tables
            .get(&role)
            .and_then(|rows| rows.iter().find(|c| c.email == email).cloned()))
    }
}
