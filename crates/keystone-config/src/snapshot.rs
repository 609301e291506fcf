//! Process-wide cached configuration snapshot.
//!
//! # Design
//! - A single `RwLock` guards the cached value; writers replace it whole.
//! - Readers always receive an owned copy, never a reference into the cell.
//! - The cell does not compare revisions: a bucket that is deleted and
//!   recreated numbers its writes from 1 again. Ordering within one watch is
//!   the session's job.

use std::sync::{Arc, PoisonError, RwLock};

use keystone_kv::Revision;

use crate::defaults::DEFAULTS;
use crate::model::ConfigRecord;

/// A decoded record paired with the store revision it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Store revision of the record.
    pub revision: Revision,
    /// Fully-defaulted record.
    pub record: ConfigRecord,
}

/// Owner-side handle to the cached snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCell {
    inner: Arc<RwLock<Option<Snapshot>>>,
}

impl SnapshotCell {
    /// Construct an empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached snapshot, returning the one it held before.
    pub fn replace(&self, snapshot: Snapshot) -> Option<Snapshot> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(snapshot)
    }

    /// Copy of the cached snapshot, if one has been loaded.
    #[must_use]
    pub fn current(&self) -> Option<Snapshot> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read-only handle for collaborators.
    #[must_use]
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Read-only view of the cached snapshot handed to collaborators.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    inner: Arc<RwLock<Option<Snapshot>>>,
}

impl SnapshotReader {
    /// Copy of the cached snapshot, if one has been loaded.
    #[must_use]
    pub fn current(&self) -> Option<Snapshot> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Revision of the cached snapshot.
    #[must_use]
    pub fn revision(&self) -> Option<Revision> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|snapshot| snapshot.revision)
    }

    /// Cached record, or the defaults when nothing has been loaded yet.
    #[must_use]
    pub fn record_or_default(&self) -> ConfigRecord {
        self.current()
            .map_or(DEFAULTS, |snapshot| snapshot.record)
    }
}
