//! Trie node model and path addressing

use alloy_primitives::U256;

use crate::hasher::NodeHasher;
use crate::Hash;

/// Storage id of a node: `hash(node_hash ‖ hash(path_key))`
pub type NodeId = Hash;

/// Value stored for a proof sibling whose subtree is not materialized
pub(crate) const SIBLING_PLACEHOLDER: [u8; 1] = [0x00];

/// Length of an internal node value (`left ‖ right`)
pub(crate) const INTERNAL_NODE_LEN: usize = 64;

/// One node of the tree
///
/// `value` is `left ‖ right` for an internal node and the raw payload for a
/// leaf. A node without a value is a shortcut standing for a whole subtree
/// that has never been materialized in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    /// Content digest
    pub hash: Hash,
    /// Stored bytes, if materialized
    pub value: Option<Vec<u8>>,
    /// Path descriptor used for storage addressing only
    pub key: U256,
}

impl Node {
    /// Node backed by `value`
    pub fn new(hash: Hash, value: Vec<u8>, key: U256) -> Self {
        Self { hash, value: Some(value), key }
    }

    /// Unmaterialized subtree known only by its hash
    pub const fn shortcut(hash: Hash, key: U256) -> Self {
        Self { hash, value: None, key }
    }

    /// Placeholder written for a proof sibling
    pub(crate) fn placeholder(hash: Hash, key: U256) -> Self {
        Self::new(hash, SIBLING_PLACEHOLDER.to_vec(), key)
    }

    /// Internal node whose value is `left ‖ right`
    pub(crate) fn internal(hasher: &dyn NodeHasher, left: &Hash, right: &Hash, key: U256) -> Self {
        let mut value = Vec::with_capacity(INTERNAL_NODE_LEN);
        value.extend_from_slice(left);
        value.extend_from_slice(right);
        Self::new(hasher.hash_pair(left, right), value, key)
    }

    /// Whether the value has the internal-node shape
    pub fn is_internal(&self) -> bool {
        self.value.as_ref().is_some_and(|v| v.len() == INTERNAL_NODE_LEN)
    }

    /// `(left, right)` child hashes of an internal node
    pub fn children(&self) -> Option<(Hash, Hash)> {
        let value = self.value.as_deref().filter(|v| v.len() == INTERNAL_NODE_LEN)?;
        let mut left = [0u8; 32];
        let mut right = [0u8; 32];
        left.copy_from_slice(&value[..32]);
        right.copy_from_slice(&value[32..]);
        Some((left, right))
    }

    /// Child hash on the `left` or right branch
    pub(crate) fn child_hash(&self, left: bool) -> Option<Hash> {
        self.children().map(|(l, r)| if left { l } else { r })
    }

    /// Hash of the child *not* on the `left` or right branch
    pub(crate) fn sibling_hash(&self, left: bool) -> Option<Hash> {
        self.child_hash(!left)
    }

    /// Whether the node is materialized and `hash == H(value)`
    pub(crate) fn is_genuine(&self, hasher: &dyn NodeHasher) -> bool {
        self.value.as_deref().is_some_and(|v| hasher.hash(v) == self.hash)
    }

    /// Storage id of this node
    pub fn id(&self, hasher: &dyn NodeHasher) -> NodeId {
        node_id(hasher, &self.hash, &self.key)
    }
}

/// Storage id for a node with `hash` located at `key`
pub(crate) fn node_id(hasher: &dyn NodeHasher, hash: &Hash, key: &U256) -> NodeId {
    let key_hash = hasher.hash(&key_bytes(key));
    hasher.hash_pair(hash, &key_hash)
}

/// Minimal big-endian encoding of a path key (zero is a single `0x00`)
pub(crate) fn key_bytes(key: &U256) -> Vec<u8> {
    let bytes = key.to_be_bytes::<32>();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    bytes[first..].to_vec()
}

/// Whether the path to `leaf_key` takes the left branch below `depth`
///
/// Only meaningful for `depth < height - 1`.
pub(crate) fn is_left(leaf_key: &U256, depth: usize, height: usize) -> bool {
    !leaf_key.bit(height - 2 - depth)
}

/// Leaf slot of `leaf_key`: the bits below `height - 1` that pick its branches
///
/// Keys that differ only above those bits share a slot.
pub(crate) fn leaf_position(leaf_key: &U256, height: usize) -> U256 {
    let mask = (U256::from(1) << (height - 1)) - U256::from(1);
    *leaf_key & mask
}

/// Path key of the node at `depth` on the way to `leaf_key`
///
/// A leaf is addressed by its full key; every ancestor by its slot prefix.
pub(crate) fn node_key(leaf_key: &U256, depth: usize, height: usize) -> U256 {
    if depth > 0 && depth + 1 == height {
        *leaf_key
    } else {
        leaf_position(leaf_key, height) >> (height - depth - 1)
    }
}

/// Path key of the sibling of the node at `depth` on the way to `leaf_key`
pub(crate) fn sibling_key(leaf_key: &U256, depth: usize, height: usize) -> U256 {
    (leaf_position(leaf_key, height) >> (height - depth - 1)) ^ U256::from(1)
}
