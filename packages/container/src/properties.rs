// ABOUTME: Persists the per-container string property map as private/properties.json
// ABOUTME: Writes are atomic via temp-then-rename; read-modify-write holds a per-container lock

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::directory::{ContainerDirectory, PRIVATE_DIR};
use crate::error::Result;

pub const PROPERTIES_FILE: &str = "properties.json";

/// Stores and retrieves container property maps.
///
/// Each container's map lives in one JSON object file under its `private/`
/// subtree. A missing file reads as an empty map.
pub struct PropertyService {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PropertyService {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn properties_path(directory: &ContainerDirectory) -> PathBuf {
        directory.root().join(PRIVATE_DIR).join(PROPERTIES_FILE)
    }

    async fn lock_for(&self, container_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(container_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn set_properties(
        &self,
        container_id: &str,
        directory: &ContainerDirectory,
        properties: &HashMap<String, String>,
    ) -> Result<()> {
        let lock = self.lock_for(container_id).await;
        let _guard = lock.lock().await;
        write_atomic(&Self::properties_path(directory), properties).await
    }

    pub async fn get_all(
        &self,
        container_id: &str,
        directory: &ContainerDirectory,
    ) -> Result<HashMap<String, String>> {
        let lock = self.lock_for(container_id).await;
        let _guard = lock.lock().await;
        read_map(&Self::properties_path(directory)).await
    }

    pub async fn get_property(
        &self,
        container_id: &str,
        directory: &ContainerDirectory,
        key: &str,
    ) -> Result<Option<String>> {
        Ok(self.get_all(container_id, directory).await?.remove(key))
    }

    pub async fn remove_property(
        &self,
        container_id: &str,
        directory: &ContainerDirectory,
        key: &str,
    ) -> Result<()> {
        let lock = self.lock_for(container_id).await;
        let _guard = lock.lock().await;
        let path = Self::properties_path(directory);
        let mut properties = read_map(&path).await?;
        if properties.remove(key).is_some() {
            write_atomic(&path, &properties).await?;
        }
        Ok(())
    }

    /// Drops the lock entry once a container is gone.
    pub async fn forget(&self, container_id: &str) {
        self.locks.lock().await.remove(container_id);
    }
}

impl Default for PropertyService {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_map(path: &PathBuf) -> Result<HashMap<String, String>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(path: &PathBuf, properties: &HashMap<String, String>) -> Result<()> {
    let temp = path.with_extension("json.tmp");
    let payload = serde_json::to_vec_pretty(properties)?;
    tokio::fs::write(&temp, payload).await?;
    tokio::fs::rename(&temp, path).await?;
    debug!(path = %path.display(), entries = properties.len(), "properties written");
    Ok(())
}
