//! Device identity
//!
//! Every request carries a stable device identifier. The default provider
//! generates a UUID on first use and keeps it in storage.

use crate::error::Result;
use async_trait::async_trait;
use storage::SharedStorage;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

/// Storage key for the generated identifier
pub const DEVICE_ID_KEY: &str = "device_id";

/// Supplies the device identifier header value
#[async_trait]
pub trait DeviceIdentityProvider: Send + Sync {
    /// Stable identifier for this installation
    async fn device_id(&self) -> Result<String>;
}

/// Fixed identifier
#[derive(Debug, Clone)]
pub struct StaticDeviceId(String);

impl StaticDeviceId {
    /// Use `id` for every request
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier, not persisted
    pub fn ephemeral() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl DeviceIdentityProvider for StaticDeviceId {
    async fn device_id(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Identifier generated once and persisted
pub struct PersistentDeviceId {
    storage: SharedStorage,
    key: String,
    cached: OnceCell<String>,
}

impl PersistentDeviceId {
    /// Keep the identifier under [`DEVICE_ID_KEY`]
    pub fn new(storage: SharedStorage) -> Self {
        Self::with_key(storage, DEVICE_ID_KEY)
    }

    /// Keep the identifier under a custom key
    pub fn with_key(storage: SharedStorage, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            cached: OnceCell::new(),
        }
    }
}

#[async_trait]
impl DeviceIdentityProvider for PersistentDeviceId {
    async fn device_id(&self) -> Result<String> {
        let id = self
            .cached
            .get_or_try_init(|| async {
                match self.storage.get_item(&self.key).await {
                    Ok(Some(existing)) => return Ok(existing),
                    Ok(None) => {}
                    Err(e) if e.is_unreadable() => {
                        warn!(error = %e, "Stored device identifier unreadable, generating a new one");
                    }
                    Err(e) => return Err(crate::error::HttpClientError::from(e)),
                }

                let generated = Uuid::new_v4().to_string();
                self.storage.set_item(&self.key, &generated).await?;
                info!(device_id = %generated, "Generated device identifier");
                Ok::<_, crate::error::HttpClientError>(generated)
            })
            .await?;

        Ok(id.clone())
    }
}
