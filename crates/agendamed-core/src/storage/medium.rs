use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

/// String-keyed persistent primitive the store is layered on.
///
/// Every method is an I/O boundary: callers must assume the task suspends
/// while it runs.
#[async_trait]
pub trait PersistentMedium: Send + Sync {
    async fn get(&self, key: &str) -> io::Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> io::Result<()>;

    async fn remove(&self, key: &str) -> io::Result<()>;

    /// Wipe every key in the namespace
    async fn clear(&self) -> io::Result<()>;

    async fn list_keys(&self) -> io::Result<Vec<String>>;

    /// Write several keys. The default writes them one after another and stops
    /// at the first failure, leaving earlier keys written.
    async fn set_many(&self, entries: Vec<(String, String)>) -> io::Result<()> {
        for (key, value) in entries {
            self.set(&key, value).await?;
        }
        Ok(())
    }
}

// ============================================================================
// In-memory medium
// ============================================================================

/// Process-local medium, mainly for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryMedium {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentMedium for MemoryMedium {
    async fn get(&self, key: &str) -> io::Result<Option<String>> {
        // Behave like a real medium: give other tasks a chance to run
        tokio::task::yield_now().await;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> io::Result<()> {
        tokio::task::yield_now().await;
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> io::Result<()> {
        tokio::task::yield_now().await;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> io::Result<()> {
        tokio::task::yield_now().await;
        self.entries.write().await.clear();
        Ok(())
    }

    async fn list_keys(&self) -> io::Result<Vec<String>> {
        tokio::task::yield_now().await;
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn set_many(&self, entries: Vec<(String, String)>) -> io::Result<()> {
        tokio::task::yield_now().await;
        let mut map = self.entries.write().await;
        map.extend(entries);
        Ok(())
    }
}

// ============================================================================
// File-backed medium
// ============================================================================

/// Extension of every document written by [`FileMedium`]
const DOCUMENT_EXTENSION: &str = "json";

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileMedium {
    dir: PathBuf,
}

impl FileMedium {
    pub fn new(dir: PathBuf) -> io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys become file names, so only a conservative alphabet is accepted.
    fn is_valid_key(key: &str) -> bool {
        !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    fn document_path(&self, key: &str) -> io::Result<PathBuf> {
        if !Self::is_valid_key(key) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid storage key: {:?}", key),
            ));
        }
        Ok(self.dir.join(format!("{}.{}", key, DOCUMENT_EXTENSION)))
    }
}

#[async_trait]
impl PersistentMedium for FileMedium {
    async fn get(&self, key: &str) -> io::Result<Option<String>> {
        let path = self.document_path(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set(&self, key: &str, value: String) -> io::Result<()> {
        let path = self.document_path(key)?;
        // Write-then-rename so a crash never leaves a half-written document
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(key = %key, path = %path.display(), "Wrote document");
        Ok(())
    }

    async fn remove(&self, key: &str) -> io::Result<()> {
        let path = self.document_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn clear(&self) -> io::Result<()> {
        for key in self.list_keys().await? {
            self.remove(&key).await?;
        }
        Ok(())
    }

    async fn list_keys(&self) -> io::Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if Self::is_valid_key(stem) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_medium_basic_operations() {
        let medium = MemoryMedium::new();
        assert_eq!(medium.get("a").await.unwrap(), None);

        medium.set("a", "1".to_string()).await.unwrap();
        medium.set("b", "2".to_string()).await.unwrap();
        assert_eq!(medium.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(medium.list_keys().await.unwrap(), vec!["a", "b"]);

        medium.remove("a").await.unwrap();
        assert_eq!(medium.get("a").await.unwrap(), None);

        medium.clear().await.unwrap();
        assert!(medium.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_medium_persists_documents() {
        let dir = tempfile::tempdir().unwrap();
        let medium = FileMedium::new(dir.path().to_path_buf()).unwrap();

        medium.set("appointments", "[]".to_string()).await.unwrap();
        medium.set("token", "\"abc\"".to_string()).await.unwrap();
        assert!(dir.path().join("appointments.json").exists());

        // A second handle on the same directory sees the data
        let reopened = FileMedium::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(reopened.get("token").await.unwrap().as_deref(), Some("\"abc\""));
        assert_eq!(reopened.list_keys().await.unwrap(), vec!["appointments", "token"]);

        reopened.remove("token").await.unwrap();
        reopened.remove("token").await.unwrap(); // removing twice is fine
        assert_eq!(reopened.get("token").await.unwrap(), None);

        reopened.clear().await.unwrap();
        assert!(reopened.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_medium_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let medium = FileMedium::new(dir.path().to_path_buf()).unwrap();

        let err = medium.set("../escape", "1".to_string()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(medium.get("").await.is_err());
    }

    #[tokio::test]
    async fn test_file_medium_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let medium = FileMedium::new(dir.path().to_path_buf()).unwrap();
        medium.set("settings", "{}".to_string()).await.unwrap();

        assert_eq!(medium.list_keys().await.unwrap(), vec!["settings"]);
    }
}
