#![forbid(unsafe_code)]
#![deny(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Key-value backend adapter used by the configuration sync engine.
//!
//! Layout: `error.rs` (`KvError`), `model.rs` (entries and operations),
//! `watch.rs` (`WatchStream`), `memory.rs` (in-process `MemoryStore`).

pub mod error;
pub mod memory;
pub mod model;
pub mod watch;

use async_trait::async_trait;

pub use error::{KvError, KvResult};
pub use memory::MemoryStore;
pub use model::{Entry, Operation, Revision};
pub use watch::WatchStream;

/// Abstraction over bucket-scoped key-value stores with per-key watches.
///
/// Every successful write returns a revision that is strictly greater than any
/// revision previously issued by the same bucket.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the latest entry stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::BucketNotFound`] when the bucket does not exist and
    /// [`KvError::KeyNotFound`] when the key is absent or deleted.
    async fn get(&self, bucket: &str, key: &str) -> KvResult<Entry>;

    /// Store `value` under `key`, returning the revision assigned to the write.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::BucketNotFound`] when the bucket does not exist.
    async fn put(&self, bucket: &str, key: &str, value: Vec<u8>) -> KvResult<Revision>;

    /// Mark `key` as deleted, returning the revision of the delete marker.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::BucketNotFound`] when the bucket does not exist.
    async fn delete(&self, bucket: &str, key: &str) -> KvResult<Revision>;

    /// Subscribe to changes of `key`.
    ///
    /// The stream first replays the current value (when one exists) and then
    /// yields every later write in revision order. It terminates with
    /// [`KvError::BucketDeleted`] if the bucket is destroyed.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::BucketNotFound`] when the bucket does not exist.
    async fn watch(&self, bucket: &str, key: &str) -> KvResult<WatchStream>;
}
