//! Error types

use alloy_primitives::U256;
use thiserror::Error;

/// Result alias used by every tree operation
pub type SmtResult<T> = Result<T, SmtError>;

/// Errors surfaced by a [`KeyValueStore`](crate::KeyValueStore) backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed an operation
    #[error("storage backend failure: {0}")]
    Backend(String),
    /// The backend is closed or otherwise unreachable
    #[error("storage backend unavailable")]
    Unavailable,
}

/// Tree errors
///
/// Verification mismatches are not errors; they come back as `false` or as a
/// lookup variant. Everything here means the call itself could not be served.
#[derive(Debug, Error)]
pub enum SmtError {
    /// Height outside `1..=MAX_HEIGHT`
    #[error("tree height must be between 1 and {max}, got {height}")]
    InvalidHeight {
        /// Requested height
        height: usize,
        /// Largest supported height
        max: usize,
    },

    /// Proof carries the wrong number of sibling hashes
    #[error("proof has {actual} siblings, expected {expected}")]
    InvalidProofLength {
        /// `height - 1`
        expected: usize,
        /// Siblings supplied
        actual: usize,
    },

    /// Leaf key does not address a leaf of this tree
    #[error("key {key} is outside the address space of a height {height} tree")]
    KeyOutOfRange {
        /// Offending key
        key: U256,
        /// Tree height
        height: usize,
    },

    /// Root hash could not be decoded into 32 bytes
    #[error("invalid root hash: {0}")]
    InvalidRootHash(String),

    /// A stored node on a fully materialized path is not an internal node
    #[error("stored node at depth {depth} is not an internal node")]
    MalformedNode {
        /// Depth of the node, root is 0
        depth: usize,
    },

    /// Configuration value could not be parsed
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Backend failure while reading or writing nodes
    #[error(transparent)]
    Store(#[from] StoreError),
}
