//! Seeded stores and services.

use std::sync::Arc;

use anyhow::Result;
use keystone_config::{DEFAULTS, StoreLocation, SyncService, codec};
use keystone_kv::{KeyValueStore, MemoryStore};

/// A stored value that is not a configuration record.
pub const CORRUPT_BLOB: &[u8] = b"abc";

/// Store holding the default location's bucket, with no key written.
#[must_use]
pub fn empty_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.ensure_bucket(&StoreLocation::default().bucket);
    store
}

/// Store with `blob` written at the default location.
///
/// # Errors
///
/// Returns an error if the write fails.
pub async fn store_with_blob(blob: &[u8]) -> Result<MemoryStore> {
    let store = empty_store();
    let location = StoreLocation::default();
    store
        .put(&location.bucket, &location.key, blob.to_vec())
        .await?;
    Ok(store)
}

/// Store with the encoded defaults written at the default location.
///
/// # Errors
///
/// Returns an error if encoding or the write fails.
pub async fn store_with_defaults() -> Result<MemoryStore> {
    let blob = codec::encode(&DEFAULTS)?;
    store_with_blob(&blob).await
}

/// Service over `store` at the default location.
#[must_use]
pub fn service_over(store: &MemoryStore) -> SyncService {
    SyncService::new(Arc::new(store.clone()), StoreLocation::default())
}
