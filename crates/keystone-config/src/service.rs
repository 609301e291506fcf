//! Sync service: load, set, and watch the configuration record.
//!
//! # Design
//! - The service owns the snapshot cell; collaborators only get readers.
//! - `load` and `set` leave the cell untouched on any failure.
//! - `set` is a read-merge-write without compare-and-swap; concurrent writers
//!   race and the last write wins.

use std::fmt;
use std::sync::Arc;

use keystone_kv::{KeyValueStore, KvError, Revision};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::codec;
use crate::defaults::DEFAULTS;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{ConfigRecord, PatchSet, StoreLocation};
use crate::session::{SyncSession, SyncSink, SyncTask};
use crate::snapshot::{Snapshot, SnapshotCell, SnapshotReader};
use crate::validate::parse_patch;

/// Keeps a cached configuration snapshot in step with the store.
#[derive(Clone)]
pub struct SyncService {
    store: Arc<dyn KeyValueStore>,
    location: StoreLocation,
    snapshot: SnapshotCell,
}

impl fmt::Debug for SyncService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncService")
            .field("location", &self.location)
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

impl SyncService {
    /// Build a service over `store` at `location` with an empty cache.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, location: StoreLocation) -> Self {
        Self {
            store,
            location,
            snapshot: SnapshotCell::new(),
        }
    }

    /// Location of the record this service manages.
    #[must_use]
    pub const fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Read-only handle to the cached snapshot.
    #[must_use]
    pub fn reader(&self) -> SnapshotReader {
        self.snapshot.reader()
    }

    /// Copy of the cached snapshot, if one has been loaded.
    #[must_use]
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.snapshot.current()
    }

    /// Read and decode the stored record, refreshing the cache.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::StoreUnavailable`] if the bucket or key is
    /// missing and [`ConfigError::Decode`] if the stored blob is malformed.
    #[instrument(name = "config.load", skip(self), fields(location = %self.location))]
    pub async fn load(&self) -> ConfigResult<ConfigRecord> {
        let (revision, record) = self.read_current("config.load").await?;
        self.cache(revision, &record);
        debug!(revision, "configuration loaded");
        Ok(record)
    }

    /// Apply `patch` to the stored record and write it back.
    ///
    /// Returns the merged record.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyPatch`] before any I/O when the patch is
    /// empty, [`ConfigError::StoreUnavailable`] when the record cannot be
    /// read or written, and [`ConfigError::Decode`] when the stored blob is
    /// malformed (nothing is written in that case).
    #[instrument(name = "config.set", skip(self, patch), fields(location = %self.location))]
    pub async fn set(&self, patch: &PatchSet) -> ConfigResult<ConfigRecord> {
        if patch.is_empty() {
            return Err(ConfigError::EmptyPatch);
        }
        let (read_revision, current) = self.read_current("config.set").await?;
        let merged = codec::merge(&current, patch);
        let revision = self.write(&merged, "config.set").await?;
        self.cache(revision, &merged);
        info!(
            read_revision,
            revision,
            fields = ?patch.field_names(),
            "configuration updated"
        );
        Ok(merged)
    }

    /// Parse an untyped JSON object into a patch and apply it.
    ///
    /// # Errors
    ///
    /// Returns the validation errors of [`parse_patch`] plus every error of
    /// [`SyncService::set`].
    pub async fn set_json(&self, value: &Value) -> ConfigResult<ConfigRecord> {
        let patch = parse_patch(value)?;
        self.set(&patch).await
    }

    /// Seed the defaults when the key is absent, then load.
    ///
    /// An existing blob is never overwritten, even a malformed one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::StoreUnavailable`] if the bucket is missing and
    /// any error of [`SyncService::load`].
    #[instrument(name = "config.bootstrap", skip(self), fields(location = %self.location))]
    pub async fn bootstrap(&self) -> ConfigResult<ConfigRecord> {
        match self
            .store
            .get(&self.location.bucket, &self.location.key)
            .await
        {
            Ok(_) => {}
            Err(KvError::KeyNotFound { .. }) => {
                let revision = self.write(&DEFAULTS, "config.bootstrap").await?;
                info!(revision, "seeded default configuration");
            }
            Err(source) => return Err(ConfigError::store("config.bootstrap", source)),
        }
        self.load().await
    }

    /// Subscribe to the record and return a session ready to run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::StoreUnavailable`] if the subscription cannot be
    /// established; nothing is delivered to `sink` in that case.
    pub async fn open_session(&self, sink: SyncSink) -> ConfigResult<SyncSession> {
        let mut session = SyncSession::new(sink, self.snapshot.clone(), self.location.clone());
        session.subscribe(self.store.as_ref()).await?;
        Ok(session)
    }

    /// Subscribe and deliver records to `sink` until the store fails or the
    /// consumer goes away.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::StoreUnavailable`] on setup failure or when the
    /// subscription breaks mid-stream.
    pub async fn sync(&self, sink: SyncSink) -> ConfigResult<()> {
        let mut session = self.open_session(sink).await?;
        session.run().await
    }

    /// Subscribe on the caller, then drive the session on a background task.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::StoreUnavailable`] if the subscription cannot be
    /// established.
    pub async fn spawn_sync(&self, sink: SyncSink) -> ConfigResult<SyncTask> {
        let session = self.open_session(sink).await?;
        Ok(SyncTask::spawn(session))
    }

    fn cache(&self, revision: Revision, record: &ConfigRecord) {
        let previous = self.snapshot.replace(Snapshot {
            revision,
            record: record.clone(),
        });
        if let Some(previous) = previous.filter(|previous| previous.revision > revision) {
            info!(
                previous = previous.revision,
                revision, "store revisions restarted; cache follows the new sequence"
            );
        }
    }

    async fn read_current(
        &self,
        operation: &'static str,
    ) -> ConfigResult<(Revision, ConfigRecord)> {
        let entry = self
            .store
            .get(&self.location.bucket, &self.location.key)
            .await
            .map_err(|source| ConfigError::store(operation, source))?;
        let record = codec::decode(&entry.value).map_err(|error| {
            warn!(
                revision = entry.revision,
                error = %error.source,
                "stored configuration is malformed"
            );
            error.at_revision(entry.revision)
        })?;
        Ok((entry.revision, record))
    }

    async fn write(
        &self,
        record: &ConfigRecord,
        operation: &'static str,
    ) -> ConfigResult<Revision> {
        let bytes = codec::encode(record)?;
        self.store
            .put(&self.location.bucket, &self.location.key, bytes)
            .await
            .map_err(|source| ConfigError::store(operation, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PasswordStrategy;
    use keystone_kv::MemoryStore;
    use serde_json::json;

    fn service(store: &MemoryStore) -> SyncService {
        SyncService::new(Arc::new(store.clone()), StoreLocation::default())
    }

    #[tokio::test]
    async fn set_merges_and_refreshes_cache() -> ConfigResult<()> {
        let store = MemoryStore::new();
        store.ensure_bucket("dev");
        let service = service(&store);
        service.bootstrap().await?;

        let merged = service
            .set(&PatchSet {
                office: Some("feishu".into()),
                ..PatchSet::default()
            })
            .await?;
        assert_eq!(merged.office, "feishu");
        assert_eq!(merged.login_ttl, DEFAULTS.login_ttl);

        let cached = service.snapshot().expect("cache populated");
        assert_eq!(cached.record, merged);
        assert_eq!(service.load().await?, merged);
        Ok(())
    }

    #[tokio::test]
    async fn empty_patch_is_rejected_before_io() {
        let store = MemoryStore::new();
        let service = service(&store);
        // The bucket does not exist, so any I/O would report it.
        let result = service.set(&PatchSet::default()).await;
        assert!(matches!(result, Err(ConfigError::EmptyPatch)));
    }

    #[tokio::test]
    async fn set_json_validates_before_writing() -> ConfigResult<()> {
        let store = MemoryStore::new();
        store.ensure_bucket("dev");
        let service = service(&store);
        service.bootstrap().await?;

        let err = service
            .set_json(&json!({ "office": "feishu", "colour": "blue" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { .. }));
        assert_eq!(service.load().await?.office, "");

        let record = service.set_json(&json!({ "pwd_strategy": 2 })).await?;
        assert_eq!(record.pwd_strategy, PasswordStrategy::MixedCase);
        Ok(())
    }

    #[tokio::test]
    async fn bootstrap_never_overwrites_existing_blob() -> ConfigResult<()> {
        let store = MemoryStore::new();
        store.ensure_bucket("dev");
        store
            .put("dev", "values", b"abc".to_vec())
            .await
            .map_err(|source| ConfigError::store("test.seed", source))?;
        let service = service(&store);

        let err = service.bootstrap().await.unwrap_err();
        assert!(err.is_decode());
        let entry = store
            .get("dev", "values")
            .await
            .map_err(|source| ConfigError::store("test.read", source))?;
        assert_eq!(entry.value, b"abc");
        Ok(())
    }

    #[tokio::test]
    async fn bootstrap_requires_bucket() {
        let store = MemoryStore::new();
        let service = service(&store);
        let err = service.bootstrap().await.unwrap_err();
        assert!(matches!(
            err,
            ConfigError::StoreUnavailable {
                operation: "config.bootstrap",
                source: KvError::BucketNotFound { .. },
            }
        ));
        assert!(service.snapshot().is_none());
    }
}
