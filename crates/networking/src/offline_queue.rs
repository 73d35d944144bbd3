//! Durable queue of requests that failed while offline
//!
//! Entries are persisted as one JSON array under a single storage key and
//! written through on every mutation. Capacity is bounded; when full the
//! oldest entry is evicted. Draining is single-flight: a second drain while
//! one is running returns immediately.

use crate::error::{HttpClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::request::RequestSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storage::SharedStorage;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Offline queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfflineQueueConfig {
    /// Queue transient failures at all
    pub enabled: bool,
    /// Maximum number of entries kept
    pub max_size: usize,
    /// Drain automatically when connectivity returns
    pub retry_on_reconnect: bool,
    /// Replays allowed per entry before it is dropped
    pub max_replay_attempts: u32,
    /// Storage key holding the serialized queue
    pub storage_key: String,
}

impl Default for OfflineQueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 50,
            retry_on_reconnect: true,
            max_replay_attempts: 3,
            storage_key: "offline_queue".to_string(),
        }
    }
}

impl OfflineQueueConfig {
    /// Disabled queue
    pub fn disabled() -> Self {
        Self { enabled: false, ..Default::default() }
    }

    /// Set the capacity
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the storage key
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Enable or disable draining on reconnect
    pub fn with_retry_on_reconnect(mut self, enabled: bool) -> Self {
        self.retry_on_reconnect = enabled;
        self
    }
}

/// A request waiting for replay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    /// Unique entry id
    pub id: String,
    /// Absolute target URL
    pub target_url: String,
    /// The request as originally issued
    pub request: RequestSpec,
    /// When the entry was first queued
    pub enqueued_at: DateTime<Utc>,
    /// Replays attempted so far
    pub retry_count: u32,
}

/// Outcome of one drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries replayed
    pub attempted: usize,
    /// Entries delivered and removed
    pub delivered: usize,
    /// Entries put back for a later drain
    pub requeued: usize,
    /// Entries discarded
    pub dropped: usize,
    /// Another drain was already running
    pub skipped: bool,
}

/// Clears the draining flag when a drain ends, including on early return
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Bounded, persisted FIFO of failed requests
pub struct OfflineQueue {
    config: OfflineQueueConfig,
    storage: SharedStorage,
    entries: Mutex<VecDeque<QueuedRequest>>,
    draining: AtomicBool,
    events: Arc<EventBus>,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("config", &self.config)
            .field("draining", &self.draining.load(Ordering::Relaxed))
            .finish()
    }
}

impl OfflineQueue {
    /// Open the queue, restoring persisted entries
    ///
    /// A persisted queue that cannot be read back or parsed is discarded
    /// with a warning.
    pub async fn open(
        config: OfflineQueueConfig,
        storage: SharedStorage,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        let key = &config.storage_key;
        let loaded: std::result::Result<VecDeque<QueuedRequest>, String> = match storage.get_item(key).await {
            Ok(None) => Ok(VecDeque::new()),
            Ok(Some(json)) => serde_json::from_str(&json).map_err(|e| e.to_string()),
            Err(e) if e.is_unreadable() => Err(e.to_string()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = match loaded {
            Ok(entries) => entries,
            Err(reason) => {
                warn!(key = %key, error = %reason, "Discarding unreadable offline queue");
                storage.remove_item(key).await?;
                VecDeque::new()
            }
        };

        while entries.len() > config.max_size {
            entries.pop_front();
        }

        if !entries.is_empty() {
            info!(count = entries.len(), "Restored offline queue");
        }

        Ok(Self {
            config,
            storage,
            entries: Mutex::new(entries),
            draining: AtomicBool::new(false),
            events,
        })
    }

    /// Settings
    pub fn config(&self) -> &OfflineQueueConfig {
        &self.config
    }

    /// Whether `error` should put its request in the queue
    pub fn should_queue(&self, error: &HttpClientError) -> bool {
        self.config.enabled && error.is_transient()
    }

    /// Whether a drain is in progress
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Number of queued entries
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the queue is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Copy of the queued entries, oldest first
    pub async fn entries(&self) -> Vec<QueuedRequest> {
        self.entries.lock().await.iter().cloned().collect()
    }

    /// Queue a request; returns the entry id, or `None` when disabled
    ///
    /// When the queue is full the oldest entry is evicted.
    pub async fn enqueue(&self, url: &str, request: &RequestSpec) -> Result<Option<String>> {
        if !self.config.enabled || self.config.max_size == 0 {
            return Ok(None);
        }

        let entry = QueuedRequest {
            id: Uuid::new_v4().to_string(),
            target_url: url.to_string(),
            request: request.clone(),
            enqueued_at: Utc::now(),
            retry_count: 0,
        };
        let id = entry.id.clone();

        let evicted = {
            let mut entries = self.entries.lock().await;
            let evicted = self.push_bounded(&mut entries, entry);
            self.persist(&entries).await?;
            evicted
        };

        info!(id = %id, url, "Request queued for replay");
        for request in evicted {
            warn!(id = %request.id, url = %request.target_url, "Offline queue full, evicting oldest entry");
            self.events.emit(&ClientEvent::RequestDropped { request });
        }
        self.events.emit(&ClientEvent::RequestQueued { id: id.clone(), url: url.to_string() });

        Ok(Some(id))
    }

    /// Remove every entry
    pub async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.clear();
        self.persist(&entries).await
    }

    /// Replay queued entries in FIFO order
    ///
    /// Each entry is removed and persisted before its replay starts. A
    /// transient replay failure puts the entry back at the tail until it has
    /// been replayed `max_replay_attempts` times; other failures drop it.
    /// Entries queued during the drain wait for the next one.
    pub async fn process_queue<F, Fut>(&self, mut replay: F) -> Result<DrainReport>
    where
        F: FnMut(QueuedRequest) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            debug!("Offline queue drain already in progress");
            return Ok(DrainReport { skipped: true, ..Default::default() });
        };

        let snapshot: Vec<String> = self.entries.lock().await.iter().map(|e| e.id.clone()).collect();
        let mut report = DrainReport::default();

        if !snapshot.is_empty() {
            info!(count = snapshot.len(), "Draining offline queue");
        }

        for id in snapshot {
            let mut entry = {
                let mut entries = self.entries.lock().await;
                let Some(index) = entries.iter().position(|e| e.id == id) else {
                    continue;
                };
                let Some(entry) = entries.remove(index) else {
                    continue;
                };
                // Never replay an entry that would come back after a restart
                if let Err(e) = self.persist(&entries).await {
                    warn!(id = %id, error = %e, "Failed to persist offline queue, stopping drain");
                    entries.insert(index, entry);
                    break;
                }
                entry
            };

            report.attempted += 1;
            entry.retry_count += 1;

            match replay(entry.clone()).await {
                Ok(()) => {
                    debug!(id = %entry.id, url = %entry.target_url, "Queued request delivered");
                    report.delivered += 1;
                }
                Err(err) if err.is_transient() && entry.retry_count < self.config.max_replay_attempts => {
                    debug!(
                        id = %entry.id,
                        retry_count = entry.retry_count,
                        error = %err,
                        "Queued request failed, keeping for next drain"
                    );
                    let evicted = {
                        let mut entries = self.entries.lock().await;
                        let evicted = self.push_bounded(&mut entries, entry);
                        if let Err(e) = self.persist(&entries).await {
                            warn!(error = %e, "Failed to persist requeued entry");
                        }
                        evicted
                    };
                    report.requeued += 1;
                    for request in evicted {
                        report.dropped += 1;
                        self.events.emit(&ClientEvent::RequestDropped { request });
                    }
                }
                Err(err) => {
                    warn!(
                        id = %entry.id,
                        url = %entry.target_url,
                        retry_count = entry.retry_count,
                        error = %err,
                        "Dropping queued request"
                    );
                    report.dropped += 1;
                    self.events.emit(&ClientEvent::RequestDropped { request: entry });
                }
            }
        }

        if report.attempted > 0 {
            info!(
                delivered = report.delivered,
                requeued = report.requeued,
                dropped = report.dropped,
                "Offline queue drain finished"
            );
        }

        Ok(report)
    }

    fn push_bounded(
        &self,
        entries: &mut VecDeque<QueuedRequest>,
        entry: QueuedRequest,
    ) -> Vec<QueuedRequest> {
        let mut evicted = Vec::new();
        while entries.len() >= self.config.max_size {
            match entries.pop_front() {
                Some(oldest) => evicted.push(oldest),
                None => break,
            }
        }
        entries.push_back(entry);
        evicted
    }

    async fn persist(&self, entries: &VecDeque<QueuedRequest>) -> Result<()> {
        let json = serde_json::to_string(entries)
            .map_err(|e| HttpClientError::Storage(format!("Failed to serialize offline queue: {}", e)))?;
        self.storage.set_item(&self.config.storage_key, &json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use std::sync::atomic::AtomicUsize;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use storage::{FileStorage, FileStorageConfig, MemoryStorage, OfflineStorage, StorageError};

    /// Memory storage whose writes can be made to fail
    #[derive(Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl OfflineStorage for FlakyStorage {
        async fn get_item(&self, key: &str) -> storage::Result<Option<String>> {
            self.inner.get_item(key).await
        }

        async fn set_item(&self, key: &str, value: &str) -> storage::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            self.inner.set_item(key, value).await
        }

        async fn remove_item(&self, key: &str) -> storage::Result<()> {
            self.inner.remove_item(key).await
        }

        async fn clear(&self) -> storage::Result<()> {
            self.inner.clear().await
        }
    }

    async fn queue_with(config: OfflineQueueConfig) -> (OfflineQueue, Arc<MemoryStorage>, Arc<EventBus>) {
        let storage = Arc::new(MemoryStorage::new());
        let events = Arc::new(EventBus::new());
        let queue = OfflineQueue::open(config, storage.clone(), events.clone())
            .await
            .unwrap();
        (queue, storage, events)
    }

    fn urls(entries: &[QueuedRequest]) -> Vec<&str> {
        entries.iter().map(|e| e.target_url.as_str()).collect()
    }

    #[tokio::test]
    async fn test_enqueue_persists() {
        let (queue, storage, _) = queue_with(OfflineQueueConfig::default()).await;

        let id = queue.enqueue("https://api.test/a", &RequestSpec::post()).await.unwrap();
        assert!(id.is_some());
        assert_eq!(queue.len().await, 1);

        let json = storage.get_item("offline_queue").await.unwrap().unwrap();
        let persisted: Vec<QueuedRequest> = serde_json::from_str(&json).unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].target_url, "https://api.test/a");
        assert_eq!(persisted[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let (queue, _, events) = queue_with(OfflineQueueConfig::default().with_max_size(2)).await;
        let dropped = Arc::new(AtomicUsize::new(0));
        let counter = dropped.clone();
        events.on(EventKind::RequestDropped, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for url in ["A", "B", "C"] {
            queue.enqueue(url, &RequestSpec::get()).await.unwrap();
        }

        assert_eq!(urls(&queue.entries().await), vec!["B", "C"]);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_queue_ignores_enqueue() {
        let (queue, _, _) = queue_with(OfflineQueueConfig::disabled()).await;
        assert_eq!(queue.enqueue("A", &RequestSpec::get()).await.unwrap(), None);
        assert!(queue.is_empty().await);
        assert!(!queue.should_queue(&HttpClientError::Network("down".into())));
    }

    #[tokio::test]
    async fn test_should_queue_only_transient() {
        let (queue, _, _) = queue_with(OfflineQueueConfig::default()).await;
        assert!(queue.should_queue(&HttpClientError::Network("down".into())));
        assert!(queue.should_queue(&HttpClientError::http(503, "down")));
        assert!(!queue.should_queue(&HttpClientError::http(400, "bad")));
        assert!(!queue.should_queue(&HttpClientError::http(401, "expired")));
        assert!(!queue.should_queue(&HttpClientError::SessionInvalidated("x".into())));
    }

    #[tokio::test]
    async fn test_restores_from_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let events = Arc::new(EventBus::new());

        {
            let queue = OfflineQueue::open(OfflineQueueConfig::default(), storage.clone(), events.clone())
                .await
                .unwrap();
            queue.enqueue("A", &RequestSpec::get()).await.unwrap();
            queue.enqueue("B", &RequestSpec::get()).await.unwrap();
        }

        let queue = OfflineQueue::open(OfflineQueueConfig::default(), storage, events)
            .await
            .unwrap();
        assert_eq!(urls(&queue.entries().await), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_unreadable_queue_is_discarded() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item("offline_queue", "{not json").await.unwrap();

        let queue = OfflineQueue::open(OfflineQueueConfig::default(), storage.clone(), Arc::new(EventBus::new()))
            .await
            .unwrap();
        assert!(queue.is_empty().await);
        assert_eq!(storage.get_item("offline_queue").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupted_file_queue_is_discarded() {
        async fn open_files(dir: &std::path::Path) -> Result<OfflineQueue> {
            let storage: SharedStorage =
                Arc::new(FileStorage::open(FileStorageConfig::new(dir)).await.unwrap());
            OfflineQueue::open(OfflineQueueConfig::default(), storage, Arc::new(EventBus::new())).await
        }

        let dir = tempfile::TempDir::new().unwrap();
        open_files(dir.path())
            .await
            .unwrap()
            .enqueue("A", &RequestSpec::get())
            .await
            .unwrap();

        // Change the stored value without updating its checksum
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let path = entry.unwrap().path();
            let mut blob: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
            blob["value"] = serde_json::json!("[ ]");
            std::fs::write(&path, blob.to_string()).unwrap();
        }

        let queue = open_files(dir.path()).await.unwrap();
        assert!(queue.is_empty().await);

        // The damaged blob is gone, so the next start is clean too
        queue.enqueue("B", &RequestSpec::get()).await.unwrap();
        let reopened = open_files(dir.path()).await.unwrap();
        assert_eq!(urls(&reopened.entries().await), vec!["B"]);
    }

    #[tokio::test]
    async fn test_drain_delivers_in_order() {
        let (queue, storage, _) = queue_with(OfflineQueueConfig::default()).await;
        for url in ["A", "B", "C"] {
            queue.enqueue(url, &RequestSpec::get()).await.unwrap();
        }

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = seen.clone();
        let report = queue
            .process_queue(|entry| {
                log.lock().push(entry.target_url.clone());
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec!["A", "B", "C"]);
        assert_eq!(report.delivered, 3);
        assert!(queue.is_empty().await);
        assert_eq!(storage.get_item("offline_queue").await.unwrap(), Some("[]".to_string()));
    }

    #[tokio::test]
    async fn test_transient_failure_is_requeued_until_limit() {
        let (queue, _, events) = queue_with(OfflineQueueConfig::default()).await;
        let dropped = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = dropped.clone();
        events.on(EventKind::RequestDropped, move |event| {
            if let ClientEvent::RequestDropped { request } = event {
                sink.lock().push(request.retry_count);
            }
        });

        queue.enqueue("A", &RequestSpec::get()).await.unwrap();

        for expected_count in 1..=2 {
            let report = queue
                .process_queue(|_| async { Err(HttpClientError::Network("offline".into())) })
                .await
                .unwrap();
            assert_eq!(report.requeued, 1);
            assert_eq!(queue.entries().await[0].retry_count, expected_count);
        }

        let report = queue
            .process_queue(|_| async { Err(HttpClientError::Network("offline".into())) })
            .await
            .unwrap();
        assert_eq!(report.dropped, 1);
        assert!(queue.is_empty().await);
        assert_eq!(*dropped.lock(), vec![3]);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_dropped() {
        let (queue, _, _) = queue_with(OfflineQueueConfig::default()).await;
        queue.enqueue("A", &RequestSpec::get()).await.unwrap();
        queue.enqueue("B", &RequestSpec::get()).await.unwrap();

        let report = queue
            .process_queue(|entry| async move {
                if entry.target_url == "A" {
                    Err(HttpClientError::http(422, "invalid"))
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(report, DrainReport { attempted: 2, delivered: 1, dropped: 1, ..Default::default() });
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_entry_is_removed_before_replay() {
        let (queue, storage, _) = queue_with(OfflineQueueConfig::default()).await;
        queue.enqueue("A", &RequestSpec::get()).await.unwrap();

        let storage_during = storage.clone();
        queue
            .process_queue(|_| {
                let storage = storage_during.clone();
                async move {
                    let json = storage.get_item("offline_queue").await.unwrap().unwrap();
                    assert_eq!(json, "[]");
                    Ok(())
                }
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_drain_stops_without_losing_entries_when_storage_fails() {
        let storage = Arc::new(FlakyStorage::default());
        let queue = OfflineQueue::open(OfflineQueueConfig::default(), storage.clone(), Arc::new(EventBus::new()))
            .await
            .unwrap();
        queue.enqueue("A", &RequestSpec::get()).await.unwrap();
        queue.enqueue("B", &RequestSpec::get()).await.unwrap();

        storage.fail_writes.store(true, Ordering::SeqCst);
        let replayed = AtomicUsize::new(0);
        let report = queue
            .process_queue(|_| {
                replayed.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(report.attempted, 0);
        assert_eq!(replayed.load(Ordering::SeqCst), 0);
        assert_eq!(urls(&queue.entries().await), vec!["A", "B"]);
        assert!(!queue.is_draining());

        storage.fail_writes.store(false, Ordering::SeqCst);
        let report = queue.process_queue(|_| async { Ok(()) }).await.unwrap();
        assert_eq!(report.delivered, 2);
    }

    #[tokio::test]
    async fn test_concurrent_drain_is_skipped() {
        let queue = Arc::new(queue_with(OfflineQueueConfig::default()).await.0);
        queue.enqueue("A", &RequestSpec::get()).await.unwrap();

        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let entered_tx = parking_lot::Mutex::new(Some(entered_tx));
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        let draining = queue.clone();
        let first = tokio::spawn(async move {
            draining
                .process_queue(move |_| {
                    if let Some(tx) = entered_tx.lock().take() {
                        let _ = tx.send(());
                    }
                    let release = release_rx.clone();
                    async move {
                        if let Some(rx) = release.lock().await.take() {
                            let _ = rx.await;
                        }
                        Ok(())
                    }
                })
                .await
        });

        entered_rx.await.unwrap();
        assert!(queue.is_draining());

        let second = queue.process_queue(|_| async { Ok(()) }).await.unwrap();
        assert!(second.skipped);
        assert_eq!(second.attempted, 0);

        release_tx.send(()).unwrap();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.delivered, 1);
        assert!(!queue.is_draining());
    }

    #[tokio::test]
    async fn test_clear() {
        let (queue, storage, _) = queue_with(OfflineQueueConfig::default()).await;
        queue.enqueue("A", &RequestSpec::get()).await.unwrap();
        queue.clear().await.unwrap();
        assert!(queue.is_empty().await);
        assert_eq!(storage.get_item("offline_queue").await.unwrap(), Some("[]".to_string()));
    }
}
