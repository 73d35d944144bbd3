//! Storage layer for the envelope client
//!
//! This crate provides the `OfflineStorage` capability used by the network core
//! to persist session blobs and queued requests, along with the backends a host
//! application can inject: in-memory, filesystem, and an embedded key-value store.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod kv;
pub mod memory;
pub mod persistence;

pub use kv::{SledConfig, SledStorage};
pub use memory::MemoryStorage;
pub use persistence::{FileStorage, FileStorageConfig};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Storage error types
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedded database error
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Corruption detected
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Version mismatch
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected version
        expected: u32,
        /// Found version
        found: u32,
    },
}

impl StorageError {
    /// Whether the stored value exists but cannot be read back
    ///
    /// Callers can drop such a value and carry on; other errors mean the
    /// backend itself is failing.
    pub fn is_unreadable(&self) -> bool {
        matches!(
            self,
            StorageError::Corruption(_)
                | StorageError::VersionMismatch { .. }
                | StorageError::Serialization(_)
        )
    }
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Asynchronous string-blob persistence
///
/// Every value is an opaque string; callers that store structured data
/// serialize it themselves so a whole blob is always written in one call.
#[async_trait]
pub trait OfflineStorage: Send + Sync {
    /// Read the value stored under `key`, if any
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the value stored under `key`; removing a missing key is not an error
    async fn remove_item(&self, key: &str) -> Result<()>;

    /// Remove every value owned by this storage
    async fn clear(&self) -> Result<()>;
}

/// Shared handle to any storage backend
pub type SharedStorage = Arc<dyn OfflineStorage>;
