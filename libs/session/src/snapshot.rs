use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use csd_core::Database;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::Result;

/// Whole-database persistence: read everything on startup, write everything after changes.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load_all(&self) -> Result<Database>;
    async fn save_all(&self, db: &Database) -> Result<()>;
}

pub type SharedSnapshotStore = Arc<dyn SnapshotStore>;

/// Pretty-printed JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "db.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load_all(&self) -> Result<Database> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Database::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no snapshot yet; starting empty");
                Ok(Database::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn save_all(&self, db: &Database) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(db)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "snapshot saved");
        Ok(())
    }
}

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySnapshotStore {
    inner: Arc<RwLock<Database>>,
    saves: Arc<std::sync::atomic::AtomicUsize>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(db: Database) -> Self {
        Self {
            inner: Arc::new(RwLock::new(db)),
            saves: Default::default(),
        }
    }

    pub async fn current(&self) -> Database {
        self.inner.read().await.clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load_all(&self) -> Result<Database> {
        Ok(self.inner.read().await.clone())
    }

    async fn save_all(&self, db: &Database) -> Result<()> {
        *self.inner.write().await = db.clone();
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
