/// Local conversation snapshots stored in sled DB
/// One confirmed snapshot per conversation key; the latest save wins.
use crate::conversation::ConversationKey;
use crate::error::{ChatError, Result};
use crate::message::Message;
use std::path::Path;
use tracing::debug;

pub struct SnapshotStore {
    db: sled::Db,
}

impl SnapshotStore {
    /// Open (or create) the snapshot store under `data_dir`
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("snapshots.db");
        let db = sled::open(&db_path)
            .map_err(|e| ChatError::Storage(format!("Failed to open snapshots DB: {}", e)))?;

        Ok(Self { db })
    }

    /// Replace the snapshot for `key`. Optimistic placeholders are never cached.
    pub fn save(&self, key: &ConversationKey, messages: &[Message]) -> Result<()> {
        let confirmed: Vec<&Message> = messages.iter().filter(|m| !m.optimistic).collect();
        let value = serde_json::to_vec(&confirmed).map_err(ChatError::Serialization)?;

        self.db
            .insert(snapshot_key(key).as_bytes(), value)
            .map_err(|e| ChatError::Storage(format!("Failed to save snapshot: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| ChatError::Storage(format!("Failed to flush snapshots DB: {}", e)))?;

        debug!("Cached {} messages for {}", confirmed.len(), key);
        Ok(())
    }

    /// Last saved snapshot for `key`, if any
    pub fn load(&self, key: &ConversationKey) -> Result<Option<Vec<Message>>> {
        match self
            .db
            .get(snapshot_key(key).as_bytes())
            .map_err(|e| ChatError::Storage(format!("Failed to read snapshot: {}", e)))?
        {
            Some(value) => {
                let messages =
                    serde_json::from_slice::<Vec<Message>>(&value).map_err(ChatError::Serialization)?;
                Ok(Some(messages))
            }
            None => Ok(None),
        }
    }

    /// Number of cached conversations
    pub fn count(&self) -> usize {
        self.db.len()
    }
}

impl Clone for SnapshotStore {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
        }
    }
}

fn snapshot_key(key: &ConversationKey) -> String {
    format!("conv:{}", key)
}
