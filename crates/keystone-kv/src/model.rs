//! Entries and operations observed through the key-value adapter.

/// Monotonically increasing write sequence assigned by a bucket.
pub type Revision = u64;

/// Kind of write that produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// The key was created or overwritten.
    Put,
    /// The key was deleted; the entry value is empty.
    Delete,
}

impl Operation {
    /// Render the operation as a lowercase label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Put => "put",
            Self::Delete => "delete",
        }
    }
}

/// A stored value together with the revision that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Bucket the entry belongs to.
    pub bucket: String,
    /// Key the entry is stored under.
    pub key: String,
    /// Raw payload bytes.
    pub value: Vec<u8>,
    /// Revision assigned to the write.
    pub revision: Revision,
    /// Operation that produced the entry.
    pub operation: Operation,
}

impl Entry {
    /// Whether the entry is a delete marker.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.operation == Operation::Delete
    }
}
