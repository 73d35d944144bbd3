//! Embedded key-value storage backend
//!
//! Backs `OfflineStorage` with a sled database. Keys are namespaced with a
//! prefix so several clients can share one database file.

use crate::{OfflineStorage, Result, StorageError};
use async_trait::async_trait;
use sled::Db;
use std::sync::Arc;

/// Sled storage configuration
#[derive(Debug, Clone)]
pub struct SledConfig {
    /// Database path
    pub path: String,
    /// Key namespace
    pub namespace: String,
    /// Cache capacity in bytes
    pub cache_capacity: u64,
    /// Enable compression
    pub use_compression: bool,
    /// Flush interval in milliseconds (None for a flush after every write)
    pub flush_every_ms: Option<u64>,
}

impl Default for SledConfig {
    fn default() -> Self {
        Self {
            path: "envelope_kv.db".to_string(),
            namespace: "envelope".to_string(),
            cache_capacity: 8 * 1024 * 1024, // 8MB
            use_compression: true,
            flush_every_ms: None,
        }
    }
}

impl SledConfig {
    /// Create a new configuration with a custom path
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), ..Default::default() }
    }

    /// Set the key namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set cache capacity in bytes
    pub fn cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Enable or disable compression
    pub fn use_compression(mut self, enabled: bool) -> Self {
        self.use_compression = enabled;
        self
    }

    /// Set flush interval in milliseconds
    pub fn flush_every_ms(mut self, ms: Option<u64>) -> Self {
        self.flush_every_ms = ms;
        self
    }
}

/// Sled-backed storage
pub struct SledStorage {
    db: Arc<Db>,
    namespace: String,
    separator: &'static str,
    flush_on_write: bool,
}

impl SledStorage {
    /// Open a database with configuration
    pub fn open(config: SledConfig) -> Result<Self> {
        let mut db_config = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_capacity)
            .use_compression(config.use_compression);

        if let Some(ms) = config.flush_every_ms {
            db_config = db_config.flush_every_ms(Some(ms));
        }

        let db = db_config.open()?;

        Ok(Self {
            db: Arc::new(db),
            namespace: config.namespace,
            separator: ":",
            flush_on_write: config.flush_every_ms.is_none(),
        })
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;

        Ok(Self {
            db: Arc::new(db),
            namespace: SledConfig::default().namespace,
            separator: ":",
            flush_on_write: false,
        })
    }

    /// Share the underlying database under another namespace
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            db: self.db.clone(),
            namespace: namespace.into(),
            separator: self.separator,
            flush_on_write: self.flush_on_write,
        }
    }

    fn full_key(&self, key: &str) -> Result<String> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("key must not be empty".to_string()));
        }
        Ok(format!("{}{}{}", self.namespace, self.separator, key))
    }

    fn prefix(&self) -> String {
        format!("{}{}", self.namespace, self.separator)
    }

    async fn flush_if_needed(&self) -> Result<()> {
        if self.flush_on_write {
            self.db.flush_async().await?;
        }
        Ok(())
    }

    /// Number of keys in this namespace
    pub fn len(&self) -> usize {
        self.db.scan_prefix(self.prefix().as_bytes()).count()
    }

    /// Check if this namespace holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OfflineStorage for SledStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let key = self.full_key(key)?;
        match self.db.get(key.as_bytes())? {
            Some(bytes) => {
                let value = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    StorageError::Corruption(format!("Value for {} is not UTF-8: {}", key, e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let key = self.full_key(key)?;
        self.db.insert(key.as_bytes(), value.as_bytes())?;
        self.flush_if_needed().await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let key = self.full_key(key)?;
        self.db.remove(key.as_bytes())?;
        self.flush_if_needed().await
    }

    async fn clear(&self) -> Result<()> {
        let prefix = self.prefix();
        let mut batch = sled::Batch::default();

        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item?;
            batch.remove(key);
        }

        self.db.apply_batch(batch)?;
        self.flush_if_needed().await
    }
}
