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

//! Runtime configuration snapshot kept in sync with a watchable key-value record.
//!
//! Layout: `model.rs` (typed record and patch set), `defaults.rs` (defaults and
//! store location), `codec.rs` (decode/encode/merge), `validate.rs` (untyped
//! patch parsing), `snapshot.rs` (shared snapshot cell), `service.rs`
//! (`SyncService`: load/set/sync), `session.rs` (watch session and channel
//! protocol), `policy.rs` (read-only views for auth collaborators).

pub mod codec;
pub mod defaults;
pub mod error;
pub mod model;
pub mod policy;
pub mod service;
pub mod session;
pub mod snapshot;
pub mod validate;

pub use defaults::{DEFAULT_BUCKET, DEFAULT_KEY, DEFAULTS};
pub use error::{ConfigError, ConfigResult, DecodeError, UnknownStrategy};
pub use model::{ConfigRecord, PasswordStrategy, PatchSet, StoreLocation};
pub use policy::{IpAccess, PasswordPolicy, PasswordViolation, SessionPolicy};
pub use service::SyncService;
pub use session::{
    CloseReason, SessionState, SyncEvent, SyncReceiver, SyncSession, SyncSink, SyncTask,
};
pub use snapshot::{Snapshot, SnapshotCell, SnapshotReader};
