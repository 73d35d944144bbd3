//! Filesystem storage backend
//!
//! One file per key inside a directory. Each file holds a versioned envelope
//! with an md5 checksum of the value, written atomically through a temp file
//! and a rename so readers never observe a torn blob.

use crate::{OfflineStorage, Result, StorageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Versioned blob container
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredBlob {
    /// Version number
    version: u32,
    /// Checksum for corruption detection
    checksum: String,
    /// The stored value
    value: String,
}

impl StoredBlob {
    fn new(version: u32, value: &str) -> Self {
        Self {
            version,
            checksum: checksum(value),
            value: value.to_string(),
        }
    }

    fn verify_checksum(&self) -> Result<()> {
        let computed = checksum(&self.value);

        if computed != self.checksum {
            return Err(StorageError::Corruption(format!(
                "Checksum mismatch: expected {}, got {}",
                self.checksum, computed
            )));
        }

        Ok(())
    }
}

fn checksum(value: &str) -> String {
    format!("{:x}", md5::compute(value.as_bytes()))
}

/// Filesystem storage configuration
#[derive(Debug, Clone)]
pub struct FileStorageConfig {
    /// Directory holding one file per key
    pub directory: PathBuf,
    /// Current blob format version
    pub version: u32,
    /// Enable atomic writes with temp files
    pub atomic_writes: bool,
    /// File extension for stored blobs
    pub extension: String,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("offline-storage"),
            version: 1,
            atomic_writes: true,
            extension: "blob".to_string(),
        }
    }
}

impl FileStorageConfig {
    /// Create a new configuration rooted at `directory`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into(), ..Default::default() }
    }

    /// Set blob format version
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Enable or disable atomic writes
    pub fn atomic_writes(mut self, enabled: bool) -> Self {
        self.atomic_writes = enabled;
        self
    }
}

/// Directory-backed storage with one file per key
#[derive(Debug, Clone)]
pub struct FileStorage {
    config: FileStorageConfig,
}

impl FileStorage {
    /// Open (and create if needed) the storage directory
    pub async fn open(config: FileStorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.directory).await?;
        Ok(Self { config })
    }

    /// Directory holding the blobs
    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    /// Map a key to its file path
    ///
    /// `_` is escaped as `__`, `:` as `_c` and `/` as `_s`, so distinct keys
    /// never share a file. Anything else outside `[A-Za-z0-9.-]` is rejected.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("key must not be empty".to_string()));
        }

        let mut name = String::with_capacity(key.len() * 2);
        for c in key.chars() {
            match c {
                '_' => name.push_str("__"),
                ':' => name.push_str("_c"),
                '/' => name.push_str("_s"),
                c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') => name.push(c),
                other => {
                    return Err(StorageError::InvalidKey(format!(
                        "unsupported character {:?} in {:?}",
                        other, key
                    )))
                }
            }
        }

        Ok(self
            .config
            .directory
            .join(format!("{}.{}", name, self.config.extension)))
    }

    async fn read_blob(&self, path: &Path) -> Result<Option<String>> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let blob: StoredBlob = serde_json::from_str(&contents)?;
        blob.verify_checksum()?;

        if blob.version != self.config.version {
            return Err(StorageError::VersionMismatch {
                expected: self.config.version,
                found: blob.version,
            });
        }

        Ok(Some(blob.value))
    }

    /// Write atomically using temp file + rename
    async fn write_atomic(&self, path: &Path, contents: &str) -> Result<()> {
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, path).await?;

        Ok(())
    }
}

#[async_trait]
impl OfflineStorage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        self.read_blob(&path).await
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let json = serde_json::to_string(&StoredBlob::new(self.config.version, value))?;

        if self.config.atomic_writes {
            self.write_atomic(&path, &json).await
        } else {
            fs::write(&path, json).await?;
            Ok(())
        }
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.config.directory).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let owned = path
                .extension()
                .map(|ext| ext == self.config.extension.as_str())
                .unwrap_or(false);

            if owned {
                fs::remove_file(&path).await?;
            }
        }

        Ok(())
    }
}
