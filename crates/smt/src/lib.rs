//! Persistent Sparse Merkle Tree (SMT) engine for rollup state commitments
//!
//! The tree covers a fixed-height binary address space and keeps its nodes in a
//! pluggable key-value store. Key features:
//! - Content-addressed storage: nodes are looked up by `(hash, path)`, never by pointer
//! - Lazy materialization: empty subtrees are implied by precomputed zero hashes
//! - Proof driven: inclusion proofs can be produced, verified and stored
//! - Deferred pruning: replaced nodes are only deleted by an explicit purge
//!
//! ```no_run
//! # async fn demo() -> rollup_smt::SmtResult<()> {
//! use rollup_smt::{MemoryStore, SparseMerkleTree, U256};
//!
//! let tree = SparseMerkleTree::empty(MemoryStore::new()).await?;
//! tree.update(U256::from(7), b"hello").await?;
//! let proof = tree.get_merkle_proof(U256::from(7), b"hello").await?.into_proof();
//! assert!(proof.is_some());
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod hasher;
mod node;
mod proof;
mod store;
mod tree;

pub use alloy_primitives::U256;
pub use config::{HasherKind, SmtConfig};
pub use error::{SmtError, SmtResult, StoreError};
pub use hasher::{Keccak256Hasher, NodeHasher, Sha256Hasher};
pub use node::{Node, NodeId};
pub use proof::{LeafUpdate, SmtProof};
pub use store::{BatchOp, KeyValueStore, MemoryStore, PrefixedStore};
pub use tree::{zero_hashes, LeafLookup, ProofLookup, SparseMerkleTree};

/// 32-byte digest type
pub type Hash = [u8; 32];

/// Value every leaf holds until it is first written (32 zero bytes)
pub const EMPTY_LEAF_VALUE: [u8; 32] = [0u8; 32];

/// Default tree height (levels from root to leaf, inclusive)
pub const DEFAULT_HEIGHT: usize = 256;

/// Largest supported height
///
/// Keys of a tree are `0..2^height`, which at this height is every `U256`.
pub const MAX_HEIGHT: usize = 256;
