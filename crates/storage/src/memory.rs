//! In-memory storage backend

use crate::{OfflineStorage, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local storage; contents are lost when the value is dropped
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    /// Whether the store holds no keys
    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl OfflineStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.items.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty().await);

        storage.set_item("key", "value").await.unwrap();
        assert_eq!(storage.get_item("key").await.unwrap(), Some("value".to_string()));
        assert_eq!(storage.len().await, 1);

        storage.remove_item("key").await.unwrap();
        assert_eq!(storage.get_item("key").await.unwrap(), None);

        // Removing again is fine
        storage.remove_item("key").await.unwrap();
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let storage = MemoryStorage::new();
        storage.set_item("key", "one").await.unwrap();
        storage.set_item("key", "two").await.unwrap();
        assert_eq!(storage.get_item("key").await.unwrap(), Some("two".to_string()));
    }

    #[tokio::test]
    async fn test_clear() {
        let storage = MemoryStorage::new();
        storage.set_item("a", "1").await.unwrap();
        storage.set_item("b", "2").await.unwrap();
        storage.clear().await.unwrap();
        assert!(storage.is_empty().await);
    }
}
