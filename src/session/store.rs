use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::EncryptedSessionRecord;

/// Durable home of the (single) encrypted session record.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The stored record, or `None` if nothing has been saved.
    async fn load(&self) -> Result<Option<EncryptedSessionRecord>>;

    /// Replace the stored record.
    async fn save(&self, record: &EncryptedSessionRecord) -> Result<()>;

    /// Forget the stored record. Clearing an empty store is not an error.
    async fn clear(&self) -> Result<()>;
}

/// JSON file store. Writes go to a sibling temp file which is then renamed
/// over the target, so a crash never leaves a half-written record.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
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
            .unwrap_or_else(|| "session".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<EncryptedSessionRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };
        let record = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(Some(record))
    }

    async fn save(&self, record: &EncryptedSessionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(record)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, json)
            .await
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

/// Process-local store, for tests and dry runs.
#[derive(Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<EncryptedSessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<EncryptedSessionRecord>> {
        self.record.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<EncryptedSessionRecord>> {
        Ok(self.slot().clone())
    }

    async fn save(&self, record: &EncryptedSessionRecord) -> Result<()> {
        *self.slot() = Some(record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}
