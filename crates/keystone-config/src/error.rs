//! Error types for configuration operations.
//!
//! # Design
//! - Keep error messages constant while carrying context fields for debugging.
//! - Store failures are fatal to the calling operation; decode failures are not
//!   fatal to a sync session and travel on their own channel.

use keystone_kv::{KvError, Revision};
use thiserror::Error;

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The bucket or key is missing, or the watch subscription broke.
    #[error("configuration store unavailable")]
    StoreUnavailable {
        /// Operation identifier.
        operation: &'static str,
        /// Source backend error.
        source: KvError,
    },
    /// The stored blob is not a valid configuration record.
    #[error("configuration record could not be decoded")]
    Decode(#[from] DecodeError),
    /// A set operation was requested without any field to change.
    #[error("configuration patch is empty")]
    EmptyPatch,
    /// Patch input was not a JSON object.
    #[error("configuration patch must be an object")]
    PatchNotObject,
    /// Patch input named a field the record does not have.
    #[error("unknown configuration field")]
    UnknownField {
        /// Name of the unexpected field.
        field: String,
    },
    /// Patch input carried a value of the wrong shape.
    #[error("invalid configuration field")]
    InvalidField {
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Serialising a record failed.
    #[error("configuration record could not be encoded")]
    Encode {
        /// Source serde error.
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub(crate) const fn store(operation: &'static str, source: KvError) -> Self {
        Self::StoreUnavailable { operation, source }
    }

    /// Whether the error reports a missing or broken store.
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Whether the error reports a malformed stored record.
    #[must_use]
    pub const fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// A stored blob that could not be decoded into a configuration record.
#[derive(Debug, Error)]
#[error("malformed configuration record")]
pub struct DecodeError {
    /// Revision of the offending entry, when it came from the store.
    pub revision: Option<Revision>,
    /// Underlying parse error.
    #[source]
    pub source: serde_json::Error,
}

impl DecodeError {
    /// Attach the revision of the entry that failed to decode.
    #[must_use]
    pub fn at_revision(mut self, revision: Revision) -> Self {
        self.revision = Some(revision);
        self
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(source: serde_json::Error) -> Self {
        Self {
            revision: None,
            source,
        }
    }
}

/// Stored password strategy outside the known range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown password strategy {value}")]
pub struct UnknownStrategy {
    /// Offending wire value.
    pub value: u8,
}
