//! Conversation state, bot registry and snapshot persistence.
//!
//! [`DeskStore`] ties the pieces together: it loads the snapshot on startup, hands out the
//! registry and the conversation store, and writes the snapshot back when asked to.

mod conversations;
mod error;
mod registry;
mod snapshot;

use std::sync::Arc;

use csd_core::Database;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info};

pub use conversations::{ConversationGuard, ConversationStore};
pub use error::{Result, StoreError};
pub use registry::{BotRegistry, BotUpdate, NewBot};
pub use snapshot::{JsonFileStore, MemorySnapshotStore, SharedSnapshotStore, SnapshotStore};

/// Authoritative in-memory state plus the snapshot it is persisted to.
#[derive(Clone)]
pub struct DeskStore {
    registry: BotRegistry,
    conversations: ConversationStore,
    snapshot: SharedSnapshotStore,
    save_lock: Arc<Mutex<()>>,
    dirty: Arc<Notify>,
}

impl DeskStore {
    pub async fn load(snapshot: SharedSnapshotStore) -> Result<Self> {
        let db = snapshot.load_all().await?;
        info!(
            tenants = db.tenants.len(),
            bots = db.bots.len(),
            conversations = db.conversations.len(),
            "snapshot loaded"
        );
        let registry = BotRegistry::from_parts(db.tenants, db.bots);
        let conversations = ConversationStore::from_parts(registry.clone(), db.conversations);
        Ok(Self {
            registry,
            conversations,
            snapshot,
            save_lock: Arc::new(Mutex::new(())),
            dirty: Arc::new(Notify::new()),
        })
    }

    pub fn in_memory() -> Self {
        let registry = BotRegistry::new();
        Self {
            conversations: ConversationStore::new(registry.clone()),
            registry,
            snapshot: Arc::new(MemorySnapshotStore::new()),
            save_lock: Arc::new(Mutex::new(())),
            dirty: Arc::new(Notify::new()),
        }
    }

    pub fn registry(&self) -> &BotRegistry {
        &self.registry
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub async fn database(&self) -> Database {
        Database {
            tenants: self.registry.tenants(),
            bots: self.registry.bots(),
            conversations: self.conversations.snapshot().await,
        }
    }

    /// Writes the snapshot. Must not be called while holding a conversation guard.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let db = self.database().await;
        self.snapshot.save_all(&db).await
    }

    /// Persists and logs failures; in-memory state stays authoritative either way.
    pub async fn persist_or_log(&self) {
        if let Err(err) = self.persist().await {
            error!(error = %err, "snapshot save failed; continuing from memory");
        }
    }

    /// Flags pending changes for the autosave task.
    pub fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    /// Saves after every [`mark_dirty`](Self::mark_dirty), coalescing bursts.
    pub fn spawn_autosave(&self) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                store.dirty.notified().await;
                store.persist_or_log().await;
            }
        })
    }
}
