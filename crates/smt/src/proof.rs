//! SMT proof and batch update descriptors

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::hasher::NodeHasher;
use crate::node::is_left;
use crate::Hash;

/// SMT inclusion proof
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtProof {
    /// The key being proven
    pub key: U256,
    /// The value at the key
    pub value: Vec<u8>,
    /// Root the proof claims membership in
    pub root_hash: Hash,
    /// Sibling hashes from leaf to root (`height - 1` elements)
    pub siblings: Vec<Hash>,
}

impl SmtProof {
    /// Height of the tree this proof was built for
    pub fn height(&self) -> usize {
        self.siblings.len() + 1
    }

    /// Compute root from proof
    pub fn compute_root(&self, hasher: &dyn NodeHasher) -> Hash {
        let height = self.height();
        let mut current_hash = hasher.hash(&self.value);

        for (i, sibling) in self.siblings.iter().enumerate() {
            let depth = height - 2 - i;
            current_hash = if is_left(&self.key, depth, height) {
                hasher.hash_pair(&current_hash, sibling)
            } else {
                hasher.hash_pair(sibling, &current_hash)
            };
        }

        current_hash
    }

    /// Verify this proof against its own claimed root
    ///
    /// Purely computational; nothing is read from or written to a tree.
    pub fn verify(&self, hasher: &dyn NodeHasher) -> bool {
        self.compute_root(hasher) == self.root_hash
    }
}

/// One entry of a batch update: move `key` from `old_value` to `new_value`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafUpdate {
    /// Leaf being updated
    pub key: U256,
    /// Value the leaf holds under the current root
    pub old_value: Vec<u8>,
    /// Value to write
    pub new_value: Vec<u8>,
    /// Leaf-to-root siblings proving `old_value`
    pub old_value_siblings: Vec<Hash>,
}

impl LeafUpdate {
    /// Build an update from an inclusion proof of the current value
    pub fn from_proof(proof: SmtProof, new_value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: proof.key,
            old_value: proof.value,
            new_value: new_value.into(),
            old_value_siblings: proof.siblings,
        }
    }

    /// Proof of the old value against `root_hash`
    pub(crate) fn old_value_proof(&self, root_hash: Hash) -> SmtProof {
        SmtProof {
            key: self.key,
            value: self.old_value.clone(),
            root_hash,
            siblings: self.old_value_siblings.clone(),
        }
    }
}
