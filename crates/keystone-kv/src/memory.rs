//! In-process key-value backend.
//!
//! # Design
//! - Mirrors the contract of a replicated KV bucket: per-bucket revisions,
//!   delete markers, and watches that replay the current value first.
//! - All state lives behind one mutex; watcher fan-out happens while the lock
//!   is held so every watcher observes writes in revision order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::KeyValueStore;
use crate::error::{KvError, KvResult};
use crate::model::{Entry, Operation, Revision};
use crate::watch::WatchStream;

/// Shared in-memory store; clones refer to the same buckets.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    buckets: HashMap<String, BucketState>,
}

#[derive(Default)]
struct BucketState {
    revision: Revision,
    entries: HashMap<String, Entry>,
    watchers: Vec<Watcher>,
}

struct Watcher {
    key: String,
    sender: mpsc::UnboundedSender<KvResult<Entry>>,
}

impl BucketState {
    fn write(&mut self, bucket: &str, key: &str, value: Vec<u8>, operation: Operation) -> Entry {
        self.revision += 1;
        let entry = Entry {
            bucket: bucket.to_string(),
            key: key.to_string(),
            value,
            revision: self.revision,
            operation,
        };
        self.entries.insert(key.to_string(), entry.clone());
        self.watchers.retain(|watcher| {
            if watcher.key != key {
                return !watcher.sender.is_closed();
            }
            watcher.sender.send(Ok(entry.clone())).is_ok()
        });
        entry
    }
}

impl MemoryStore {
    /// Construct an empty store without any buckets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new, empty bucket.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::BucketExists`] if the bucket is already present.
    pub fn create_bucket(&self, bucket: &str) -> KvResult<()> {
        let mut state = self.state();
        if state.buckets.contains_key(bucket) {
            return Err(KvError::BucketExists {
                bucket: bucket.to_string(),
            });
        }
        state
            .buckets
            .insert(bucket.to_string(), BucketState::default());
        info!(bucket, "bucket created");
        Ok(())
    }

    /// Create the bucket if it does not exist yet.
    pub fn ensure_bucket(&self, bucket: &str) {
        let mut state = self.state();
        state.buckets.entry(bucket.to_string()).or_default();
    }

    /// Whether a bucket with the given name exists.
    #[must_use]
    pub fn bucket_exists(&self, bucket: &str) -> bool {
        self.state().buckets.contains_key(bucket)
    }

    /// Destroy a bucket, terminating all of its watches with
    /// [`KvError::BucketDeleted`].
    ///
    /// # Errors
    ///
    /// Returns [`KvError::BucketNotFound`] if the bucket does not exist.
    pub fn delete_bucket(&self, bucket: &str) -> KvResult<()> {
        let removed = self.state().buckets.remove(bucket);
        let Some(removed) = removed else {
            return Err(KvError::BucketNotFound {
                bucket: bucket.to_string(),
            });
        };
        let watchers = removed.watchers.len();
        for watcher in removed.watchers {
            let _ = watcher.sender.send(Err(KvError::BucketDeleted {
                bucket: bucket.to_string(),
            }));
        }
        info!(bucket, watchers, "bucket deleted");
        Ok(())
    }

    /// Number of live watches registered on a bucket.
    #[must_use]
    pub fn watcher_count(&self, bucket: &str) -> usize {
        self.state().buckets.get(bucket).map_or(0, |state| {
            state
                .watchers
                .iter()
                .filter(|watcher| !watcher.sender.is_closed())
                .count()
        })
    }
}

fn missing_bucket(bucket: &str) -> KvError {
    KvError::BucketNotFound {
        bucket: bucket.to_string(),
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> KvResult<Entry> {
        let state = self.state();
        let bucket_state = state
            .buckets
            .get(bucket)
            .ok_or_else(|| missing_bucket(bucket))?;
        bucket_state
            .entries
            .get(key)
            .filter(|entry| !entry.is_delete())
            .cloned()
            .ok_or_else(|| KvError::KeyNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(&self, bucket: &str, key: &str, value: Vec<u8>) -> KvResult<Revision> {
        let mut state = self.state();
        let bucket_state = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| missing_bucket(bucket))?;
        let entry = bucket_state.write(bucket, key, value, Operation::Put);
        debug!(bucket, key, revision = entry.revision, "entry stored");
        Ok(entry.revision)
    }

    async fn delete(&self, bucket: &str, key: &str) -> KvResult<Revision> {
        let mut state = self.state();
        let bucket_state = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| missing_bucket(bucket))?;
        let entry = bucket_state.write(bucket, key, Vec::new(), Operation::Delete);
        debug!(bucket, key, revision = entry.revision, "entry deleted");
        Ok(entry.revision)
    }

    async fn watch(&self, bucket: &str, key: &str) -> KvResult<WatchStream> {
        let mut state = self.state();
        let bucket_state = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| missing_bucket(bucket))?;

        let (sender, stream) = WatchStream::channel();
        if let Some(current) = bucket_state
            .entries
            .get(key)
            .filter(|entry| !entry.is_delete())
        {
            let _ = sender.send(Ok(current.clone()));
        }
        bucket_state.watchers.push(Watcher {
            key: key.to_string(),
            sender,
        });
        debug!(bucket, key, "watch registered");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    const BUCKET: &str = "dev";
    const KEY: &str = "values";

    async fn next_item(stream: &mut WatchStream) -> Option<KvResult<Entry>> {
        timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("watch should yield within timeout")
    }

    #[tokio::test]
    async fn revisions_increase_per_write() -> KvResult<()> {
        let store = MemoryStore::new();
        store.create_bucket(BUCKET)?;

        let first = store.put(BUCKET, KEY, b"a".to_vec()).await?;
        let second = store.put(BUCKET, "other", b"b".to_vec()).await?;
        let third = store.delete(BUCKET, KEY).await?;
        assert!(first < second && second < third);
        Ok(())
    }

    #[tokio::test]
    async fn get_reports_missing_bucket_and_deleted_key() -> KvResult<()> {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get(BUCKET, KEY).await,
            Err(KvError::BucketNotFound { .. })
        ));

        store.create_bucket(BUCKET)?;
        store.put(BUCKET, KEY, b"{}".to_vec()).await?;
        assert_eq!(store.get(BUCKET, KEY).await?.value, b"{}".to_vec());

        store.delete(BUCKET, KEY).await?;
        assert!(matches!(
            store.get(BUCKET, KEY).await,
            Err(KvError::KeyNotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn create_bucket_rejects_duplicates() -> KvResult<()> {
        let store = MemoryStore::new();
        store.create_bucket(BUCKET)?;
        assert!(matches!(
            store.create_bucket(BUCKET),
            Err(KvError::BucketExists { .. })
        ));
        store.ensure_bucket(BUCKET);
        assert!(store.bucket_exists(BUCKET));
        Ok(())
    }

    #[tokio::test]
    async fn watch_replays_current_value_then_live_writes() -> KvResult<()> {
        let store = MemoryStore::new();
        store.create_bucket(BUCKET)?;
        let baseline = store.put(BUCKET, KEY, b"one".to_vec()).await?;

        let mut stream = store.watch(BUCKET, KEY).await?;
        store.put(BUCKET, "unrelated", b"x".to_vec()).await?;
        let live = store.put(BUCKET, KEY, b"two".to_vec()).await?;

        let first = next_item(&mut stream).await.expect("baseline entry")?;
        assert_eq!(first.revision, baseline);
        assert_eq!(first.value, b"one".to_vec());

        let second = next_item(&mut stream).await.expect("live entry")?;
        assert_eq!(second.revision, live);
        assert_eq!(second.operation, Operation::Put);
        Ok(())
    }

    #[tokio::test]
    async fn watch_forwards_delete_markers() -> KvResult<()> {
        let store = MemoryStore::new();
        store.create_bucket(BUCKET)?;
        let mut stream = store.watch(BUCKET, KEY).await?;

        store.delete(BUCKET, KEY).await?;
        let marker = next_item(&mut stream).await.expect("delete marker")?;
        assert!(marker.is_delete());
        assert!(marker.value.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn deleting_bucket_terminates_watch() -> KvResult<()> {
        let store = MemoryStore::new();
        store.create_bucket(BUCKET)?;
        let mut stream = store.watch(BUCKET, KEY).await?;

        store.delete_bucket(BUCKET)?;
        let terminal = next_item(&mut stream).await.expect("terminal error");
        assert!(matches!(terminal, Err(KvError::BucketDeleted { .. })));
        assert!(next_item(&mut stream).await.is_none());
        assert!(matches!(
            store.watch(BUCKET, KEY).await,
            Err(KvError::BucketNotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn dropped_watch_is_pruned_on_next_write() -> KvResult<()> {
        let store = MemoryStore::new();
        store.create_bucket(BUCKET)?;
        let stream = store.watch(BUCKET, KEY).await?;
        assert_eq!(store.watcher_count(BUCKET), 1);

        drop(stream);
        store.put(BUCKET, KEY, b"{}".to_vec()).await?;
        assert_eq!(store.watcher_count(BUCKET), 0);
        Ok(())
    }
}
