//! The append-only object store seam.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};

/// Write-once blob storage for pipeline artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`. Fails with `AlreadyExists` if the key is taken.
    async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Store a local file under `key`. Same write-once rule as [`put_bytes`](Self::put_bytes).
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()>;

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Download `key` to `path`, creating parent directories.
    async fn download_file(&self, key: &str, path: &Path) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Time-limited GET URL for clients.
    async fn presign_get(&self, key: &str) -> StorageResult<String>;

    async fn check_connectivity(&self) -> StorageResult<()>;
}

/// In-process object store for tests and local runs.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(key) {
            return Err(StorageError::already_exists(key));
        }
        objects.insert(key.to_string(), (data, content_type.to_string()));
        Ok(())
    }

    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()> {
        let data = tokio::fs::read(path).await?;
        self.put_bytes(key, data, content_type).await
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn download_file(&self, key: &str, path: &Path) -> StorageResult<()> {
        let data = self.get_bytes(key).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn presign_get(&self, key: &str) -> StorageResult<String> {
        if !self.exists(key).await? {
            return Err(StorageError::not_found(key));
        }
        Ok(format!("memory://{}", key))
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keys_are_write_once() {
        let store = MemoryObjectStore::new();
        store.put_bytes("p/s/final.mp4", vec![1, 2, 3], "video/mp4").await.unwrap();

        let second = store.put_bytes("p/s/final.mp4", vec![9], "video/mp4").await;
        assert!(matches!(second, Err(StorageError::AlreadyExists(_))));
        assert_eq!(store.get_bytes("p/s/final.mp4").await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.mp3");
        tokio::fs::write(&src, b"audio").await.unwrap();

        let store = MemoryObjectStore::new();
        store.put_file("k/audio.mp3", &src, "audio/mpeg").await.unwrap();

        let dst = dir.path().join("nested/out.mp3");
        store.download_file("k/audio.mp3", &dst).await.unwrap();
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"audio");
    }

    #[tokio::test]
    async fn test_presign_missing_key() {
        let store = MemoryObjectStore::new();
        assert!(matches!(
            store.presign_get("nope").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
