use crate::app::ports::PersistencePort;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// One JSON array file per list key under `root`
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, list_key: &str) -> Result<PathBuf> {
        let valid = !list_key.is_empty()
            && list_key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(IngestError::Storage(format!("invalid list key '{}'", list_key)));
        }
        Ok(self.root.join(format!("{}.json", list_key)))
    }
}

#[async_trait]
impl PersistencePort for FsDocumentStore {
    async fn get(&self, list_key: &str) -> Result<Vec<serde_json::Value>> {
        let path = self.path_for(list_key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, list_key: &str, records: Vec<serde_json::Value>) -> Result<()> {
        let path = self.path_for(list_key)?;
        tokio::fs::create_dir_all(&self.root).await?;
        // Write then rename so readers never see a half-written list.
        let tmp = self
            .root
            .join(format!("{}.{}.tmp", list_key, Uuid::new_v4().simple()));
        let body = serde_json::to_vec_pretty(&records)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(key = list_key, count = records.len(), "Persisted list");
        Ok(())
    }
}

/// In-memory store for development and testing
#[derive(Default)]
pub struct InMemoryDocumentStore {
    lists: Mutex<HashMap<String, Vec<serde_json::Value>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistencePort for InMemoryDocumentStore {
    async fn get(&self, list_key: &str) -> Result<Vec<serde_json::Value>> {
        Ok(self.lists.lock().await.get(list_key).cloned().unwrap_or_default())
    }

    async fn put(&self, list_key: &str, records: Vec<serde_json::Value>) -> Result<()> {
        self.lists.lock().await.insert(list_key.to_string(), records);
        Ok(())
    }
}
