//! Sparse Merkle Tree engine
//!
//! Every public operation takes the tree-wide lock once and then runs on the
//! `*_locked` helpers, which expect the caller to already hold the
//! [`TreeState`]. Composite operations such as [`SparseMerkleTree::batch_update`]
//! call those helpers directly instead of re-entering the lock.

use std::collections::HashSet;
use std::fmt;

use alloy_primitives::U256;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::SmtConfig;
use crate::error::{SmtError, SmtResult};
use crate::hasher::{Keccak256Hasher, NodeHasher};
use crate::node::{self, Node, NodeId};
use crate::proof::{LeafUpdate, SmtProof};
use crate::store::{BatchOp, KeyValueStore, PrefixedStore};
use crate::{Hash, DEFAULT_HEIGHT, EMPTY_LEAF_VALUE, MAX_HEIGHT};

/// Result of a leaf read
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeafLookup {
    /// Value held by the leaf under the current root
    Found(Vec<u8>),
    /// The caller's expected root is no longer the current root
    StaleRoot,
    /// The path ends in a subtree that is neither stored nor provably empty
    Unmaterialized {
        /// Number of path nodes that could be read, root included
        depth: usize,
    },
}

impl LeafLookup {
    /// The leaf value, if one was found
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            Self::Found(value) => Some(value),
            Self::StaleRoot | Self::Unmaterialized { .. } => None,
        }
    }
}

/// Result of a proof request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProofLookup {
    /// Proof of the value against the current root
    Available(SmtProof),
    /// The leaf holds a different value
    ValueMismatch,
    /// Not enough of the path is stored to build a proof
    Unmaterialized,
}

impl ProofLookup {
    /// The proof, if one is available
    pub fn into_proof(self) -> Option<SmtProof> {
        match self {
            Self::Available(proof) => Some(proof),
            Self::ValueMismatch | Self::Unmaterialized => None,
        }
    }
}

/// Hashes of empty subtrees, indexed by depth (`[height - 1]` is the empty leaf)
pub fn zero_hashes(hasher: &dyn NodeHasher, height: usize) -> Vec<Hash> {
    let mut hashes = Vec::with_capacity(height);
    if height == 0 {
        return hashes;
    }
    hashes.push(hasher.hash(&EMPTY_LEAF_VALUE));
    for _ in 1..height {
        let below = hashes[hashes.len() - 1];
        hashes.push(hasher.hash_pair(&below, &below));
    }
    hashes.reverse();
    hashes
}

fn short(hash: &Hash) -> String {
    hex::encode(&hash[..4])
}

/// Mutable part of the tree, guarded by the tree lock
#[derive(Debug)]
struct TreeState {
    root: Node,
    /// Ids replaced by later writes, deleted on the next purge
    pending_deletions: HashSet<NodeId>,
}

impl TreeState {
    fn retire(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        self.pending_deletions.extend(ids);
    }

    /// Ids written again must survive the next purge
    fn revive(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        for id in ids {
            self.pending_deletions.remove(&id);
        }
    }
}

/// Persistent Sparse Merkle Tree over a [`KeyValueStore`]
pub struct SparseMerkleTree<S> {
    store: S,
    hasher: Box<dyn NodeHasher>,
    height: usize,
    zero_hashes: Vec<Hash>,
    state: Mutex<TreeState>,
}

impl<S> fmt::Debug for SparseMerkleTree<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseMerkleTree")
            .field("height", &self.height)
            .field("hasher", &self.hasher)
            .finish_non_exhaustive()
    }
}

impl<S: KeyValueStore> SparseMerkleTree<PrefixedStore<S>> {
    /// Build a tree from `config`, namespacing its nodes inside `store`
    pub async fn from_config(store: S, config: &SmtConfig) -> SmtResult<Self> {
        let store = PrefixedStore::new(config.key_prefix(), store);
        Self::create(store, config.root_hash()?, config.height, config.hasher.build()).await
    }
}

impl<S: KeyValueStore> SparseMerkleTree<S> {
    /// Create a tree, resuming from `root_hash` when given
    ///
    /// A root that is not in the store becomes an unmaterialized shortcut node;
    /// its leaves can be brought in later through [`Self::verify_and_store`].
    pub async fn create(
        store: S,
        root_hash: Option<Hash>,
        height: usize,
        hasher: Box<dyn NodeHasher>,
    ) -> SmtResult<Self> {
        if height == 0 || height > MAX_HEIGHT {
            return Err(SmtError::InvalidHeight { height, max: MAX_HEIGHT });
        }

        let zero_hashes = zero_hashes(hasher.as_ref(), height);
        let empty_root = Node::shortcut(zero_hashes[0], U256::ZERO);
        let mut tree = Self {
            store,
            hasher,
            height,
            zero_hashes,
            state: Mutex::new(TreeState { root: empty_root, pending_deletions: HashSet::new() }),
        };

        if let Some(root_hash) = root_hash {
            let root = tree.load_root(root_hash).await?;
            tree.state.get_mut().root = root;
        } else {
            info!(
                "Initialized empty sparse merkle tree (height {}) with root {}",
                height,
                hex::encode(tree.zero_hashes[0])
            );
        }

        Ok(tree)
    }

    /// Empty Keccak256 tree of [`DEFAULT_HEIGHT`]
    pub async fn empty(store: S) -> SmtResult<Self> {
        Self::create(store, None, DEFAULT_HEIGHT, Box::new(Keccak256Hasher)).await
    }

    /// Empty Keccak256 tree of the given height
    pub async fn with_height(store: S, height: usize) -> SmtResult<Self> {
        Self::create(store, None, height, Box::new(Keccak256Hasher)).await
    }

    async fn load_root(&self, root_hash: Hash) -> SmtResult<Node> {
        let root = match self.get_node(root_hash, U256::ZERO).await? {
            Some(root) => {
                info!("Resumed sparse merkle tree from stored root {}", hex::encode(root_hash));
                root
            }
            None => {
                info!(
                    "Root {} not in store, starting from an unmaterialized root",
                    hex::encode(root_hash)
                );
                Node::shortcut(root_hash, U256::ZERO)
            }
        };
        Ok(root)
    }

    /// Levels from root to leaf, inclusive
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Backing store
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Node hasher
    pub fn hasher(&self) -> &dyn NodeHasher {
        self.hasher.as_ref()
    }

    /// Hash of an empty subtree rooted at `depth`
    pub fn zero_hash(&self, depth: usize) -> Option<Hash> {
        self.zero_hashes.get(depth).copied()
    }

    /// Current root hash
    pub async fn root_hash(&self) -> Hash {
        self.state.lock().await.root.hash
    }

    /// Number of node ids waiting for [`Self::purge_old_nodes`]
    pub async fn pending_deletions(&self) -> usize {
        self.state.lock().await.pending_deletions.len()
    }

    /// Read the leaf at `key`
    ///
    /// With `expected_root`, answers [`LeafLookup::StaleRoot`] unless it is
    /// still the current root. Leaves inside a provably empty subtree read as
    /// [`EMPTY_LEAF_VALUE`] without touching the store.
    pub async fn get_leaf(&self, key: U256, expected_root: Option<Hash>) -> SmtResult<LeafLookup> {
        self.check_key(&key)?;
        let state = self.state.lock().await;
        self.get_leaf_locked(&state, &key, expected_root).await
    }

    /// Verify `proof` against the current root and store its path
    ///
    /// Returns `false` without writing anything when the proof does not lead
    /// to the current root. The proof's own `root_hash` is not consulted.
    pub async fn verify_and_store(&self, proof: &SmtProof) -> SmtResult<bool> {
        self.check_proof(proof)?;
        let mut state = self.state.lock().await;
        self.verify_and_store_locked(&mut state, proof).await
    }

    /// Materialize the path to an implicitly empty leaf
    ///
    /// Siblings come from the stored prefix of the path and from the zero
    /// hashes below it. `known_materialized` caps how many path nodes, root
    /// included, are trusted from the store.
    pub async fn verify_and_store_partially_empty_path(
        &self,
        key: U256,
        known_materialized: Option<usize>,
    ) -> SmtResult<bool> {
        self.check_key(&key)?;
        let mut state = self.state.lock().await;
        let mut path = self.nodes_in_path(&state.root, &key).await?;
        if let Some(count) = known_materialized {
            path.truncate(count.max(1));
        }
        self.verify_and_store_empty_path_locked(&mut state, &key, &path).await
    }

    /// Set the leaf at `key` to `value`
    ///
    /// Returns `false` only when the path cannot be materialized from what the
    /// tree knows (for example under a shortcut root with no stored proof).
    pub async fn update(&self, key: U256, value: &[u8]) -> SmtResult<bool> {
        self.check_key(&key)?;
        let mut state = self.state.lock().await;
        self.update_locked(&mut state, &key, value).await
    }

    /// Apply `updates` as one unit
    ///
    /// Every old value is verified against the current root before any new
    /// value is written. A failed verification returns `false` and leaves the
    /// root unchanged.
    ///
    /// # Panics
    ///
    /// If an update fails after its old value was verified and stored, which
    /// means the store or the tree is corrupt.
    pub async fn batch_update(&self, updates: &[LeafUpdate]) -> SmtResult<bool> {
        for update in updates {
            self.check_key(&update.key)?;
            self.check_sibling_count(update.old_value_siblings.len())?;
        }

        let mut state = self.state.lock().await;
        for update in updates {
            let proof = update.old_value_proof(state.root.hash);
            if !self.verify_and_store_locked(&mut state, &proof).await? {
                info!(
                    "Batch update of {} leaves rejected: old value of key {} does not verify",
                    updates.len(),
                    update.key
                );
                return Ok(false);
            }
        }

        for update in updates {
            match self.update_locked(&mut state, &update.key, &update.new_value).await {
                Ok(true) => {}
                Ok(false) | Err(SmtError::MalformedNode { .. }) => {
                    error!("Update of key {} failed after its old value was verified", update.key);
                    panic!("verify and store succeeded but update of key {} did not", update.key);
                }
                Err(e) => return Err(e),
            }
        }

        debug!("Batch updated {} leaves, new root {}", updates.len(), short(&state.root.hash));
        Ok(true)
    }

    /// Build an inclusion proof of `value` at `key`
    ///
    /// An empty leaf whose path is not stored yet is materialized first.
    pub async fn get_merkle_proof(&self, key: U256, value: &[u8]) -> SmtResult<ProofLookup> {
        self.check_key(&key)?;
        let mut state = self.state.lock().await;
        self.get_merkle_proof_locked(&mut state, &key, value).await
    }

    /// Delete every node replaced since the last purge
    ///
    /// Only safe once nothing still reads through an older root.
    pub async fn purge_old_nodes(&self) -> SmtResult<()> {
        let mut state = self.state.lock().await;
        if state.pending_deletions.is_empty() {
            return Ok(());
        }

        let ops: Vec<BatchOp> = state
            .pending_deletions
            .iter()
            .map(|id| BatchOp::Delete { key: id.to_vec() })
            .collect();
        let count = ops.len();
        self.store.batch(ops).await?;
        state.pending_deletions.clear();

        debug!("Purged {} stale nodes", count);
        Ok(())
    }

    async fn get_leaf_locked(
        &self,
        state: &TreeState,
        key: &U256,
        expected_root: Option<Hash>,
    ) -> SmtResult<LeafLookup> {
        if expected_root.is_some_and(|root| root != state.root.hash) {
            debug!("Cannot get leaf {} because root hash does not match", key);
            return Ok(LeafLookup::StaleRoot);
        }

        let path = self.nodes_in_path(&state.root, key).await?;
        if path.len() == self.height {
            let leaf = &path[self.height - 1];
            if let Some(value) = leaf.value.as_ref().filter(|_| leaf.is_genuine(self.hasher())) {
                return Ok(LeafLookup::Found(value.clone()));
            }
        }

        if self.ends_in_empty_subtree(&path, key) {
            return Ok(LeafLookup::Found(EMPTY_LEAF_VALUE.to_vec()));
        }

        debug!(
            "Cannot get leaf {}: only {} of {} path nodes are stored",
            key,
            path.len(),
            self.height
        );
        Ok(LeafLookup::Unmaterialized { depth: path.len() })
    }

    async fn verify_and_store_locked(
        &self,
        state: &mut TreeState,
        proof: &SmtProof,
    ) -> SmtResult<bool> {
        let key = &proof.key;
        let leaf_hash = self.hasher.hash(&proof.value);
        let existing = self.nodes_in_path(&state.root, key).await?;

        let stored_leaf = &existing[existing.len() - 1];
        if stored_leaf.hash == leaf_hash
            && stored_leaf.is_genuine(self.hasher())
            && self.path_siblings(&existing, key).as_deref() == Some(proof.siblings.as_slice())
        {
            debug!("Leaf {} already stored under the current root", key);
            return Ok(true);
        }

        let mut node =
            Node::new(leaf_hash, proof.value.clone(), self.node_key(key, self.height - 1));
        let mut to_store = vec![node.clone()];
        for (sibling, depth) in proof.siblings.iter().zip((0..self.height - 1).rev()) {
            node = self.parent_node(&node.hash, sibling, key, depth);
            to_store.push(node.clone());
        }

        if node.hash != state.root.hash {
            info!(
                "Proof for key {} leads to root {}, current root is {}",
                key,
                short(&node.hash),
                short(&state.root.hash)
            );
            return Ok(false);
        }

        // Siblings that are not stored yet get a placeholder so the path
        // below them can be recognised later.
        for (sibling, depth) in proof.siblings.iter().zip((1..self.height).rev()) {
            let sibling_key = node::sibling_key(key, depth, self.height);
            if self.get_node(*sibling, sibling_key).await?.is_none() {
                to_store.push(Node::placeholder(*sibling, sibling_key));
            }
        }

        self.write_nodes(&to_store).await?;

        state.retire(existing.iter().map(|n| n.id(self.hasher())));
        state.revive(to_store.iter().map(|n| n.id(self.hasher())));
        // Same hash, but the root may have gone from shortcut to stored node
        state.root = node;
        Ok(true)
    }

    async fn verify_and_store_empty_path_locked(
        &self,
        state: &mut TreeState,
        key: &U256,
        path: &[Node],
    ) -> SmtResult<bool> {
        let mut siblings = Vec::with_capacity(self.height - 1);
        for depth in 0..self.height - 1 {
            match path.get(depth).and_then(|n| n.sibling_hash(self.is_left(key, depth))) {
                Some(sibling) => siblings.push(sibling),
                None => {
                    siblings.extend_from_slice(&self.zero_hashes[depth + 1..]);
                    break;
                }
            }
        }
        siblings.reverse();

        let proof = SmtProof {
            key: *key,
            value: EMPTY_LEAF_VALUE.to_vec(),
            root_hash: state.root.hash,
            siblings,
        };
        self.verify_and_store_locked(state, &proof).await
    }

    async fn update_locked(
        &self,
        state: &mut TreeState,
        key: &U256,
        value: &[u8],
    ) -> SmtResult<bool> {
        let mut path = self.nodes_in_path(&state.root, key).await?;
        if path.len() != self.height {
            debug!(
                "Materializing path to leaf {} ({} of {} nodes stored)",
                key,
                path.len(),
                self.height
            );
            if !self.verify_and_store_empty_path_locked(state, key, &path).await? {
                info!("Unable to update leaf {}: its path cannot be materialized", key);
                return Ok(false);
            }
            path = self.nodes_in_path(&state.root, key).await?;
            if path.len() != self.height {
                warn!("Path to leaf {} is still incomplete after materialization", key);
                return Ok(false);
            }
        }

        let leaf_hash = self.hasher.hash(value);
        let old_leaf = &path[self.height - 1];
        // A placeholder with the right hash still needs its value written
        if old_leaf.hash == leaf_hash && old_leaf.is_genuine(self.hasher()) {
            debug!("Leaf {} already holds the requested value", key);
            return Ok(true);
        }

        let mut node = Node::new(leaf_hash, value.to_vec(), self.node_key(key, self.height - 1));
        let mut to_store = vec![node.clone()];
        for depth in (0..self.height - 1).rev() {
            let Some(sibling) = path[depth].sibling_hash(self.is_left(key, depth)) else {
                warn!("Node at depth {} on the path to leaf {} is not internal", depth, key);
                return Err(SmtError::MalformedNode { depth });
            };
            node = self.parent_node(&node.hash, &sibling, key, depth);
            to_store.push(node.clone());
        }

        self.write_nodes(&to_store).await?;

        state.retire(path.iter().map(|n| n.id(self.hasher())));
        state.revive(to_store.iter().map(|n| n.id(self.hasher())));
        debug!(
            "Leaf {} updated, root {} -> {}",
            key,
            short(&state.root.hash),
            short(&node.hash)
        );
        state.root = node;
        Ok(true)
    }

    async fn get_merkle_proof_locked(
        &self,
        state: &mut TreeState,
        key: &U256,
        value: &[u8],
    ) -> SmtResult<ProofLookup> {
        let mut path = self.nodes_in_path(&state.root, key).await?;
        if path.len() != self.height {
            if value != EMPTY_LEAF_VALUE.as_slice() {
                if self.ends_in_empty_subtree(&path, key) {
                    return Ok(ProofLookup::ValueMismatch);
                }
                return Ok(ProofLookup::Unmaterialized);
            }

            info!("Storing empty path to leaf {} to build its proof", key);
            if !self.verify_and_store_empty_path_locked(state, key, &path).await? {
                return Ok(ProofLookup::Unmaterialized);
            }
            path = self.nodes_in_path(&state.root, key).await?;
        }

        let Some(siblings) = self.path_siblings(&path, key) else {
            return Ok(ProofLookup::Unmaterialized);
        };

        if path[self.height - 1].hash != self.hasher.hash(value) {
            info!("Stored leaf {} does not match the value to prove", key);
            return Ok(ProofLookup::ValueMismatch);
        }

        Ok(ProofLookup::Available(SmtProof {
            key: *key,
            value: value.to_vec(),
            root_hash: state.root.hash,
            siblings,
        }))
    }

    /// Nodes from the root towards `leaf_key`, stopping at the first one
    /// that is missing, malformed or a leaf
    async fn nodes_in_path(&self, root: &Node, leaf_key: &U256) -> SmtResult<Vec<Node>> {
        let mut path = vec![root.clone()];
        for depth in 0..self.height - 1 {
            let Some(child_hash) = path[depth].child_hash(self.is_left(leaf_key, depth)) else {
                break;
            };
            match self.get_node(child_hash, self.node_key(leaf_key, depth + 1)).await? {
                Some(child) => path.push(child),
                None => break,
            }
        }
        Ok(path)
    }

    /// Leaf-to-root siblings of a complete path
    fn path_siblings(&self, path: &[Node], leaf_key: &U256) -> Option<Vec<Hash>> {
        if path.len() != self.height {
            return None;
        }
        let mut siblings = (0..self.height - 1)
            .map(|depth| path[depth].sibling_hash(self.is_left(leaf_key, depth)))
            .collect::<Option<Vec<_>>>()?;
        siblings.reverse();
        Some(siblings)
    }

    /// Whether the subtree where `path` stops is known to be empty
    fn ends_in_empty_subtree(&self, path: &[Node], leaf_key: &U256) -> bool {
        let Some(last) = path.last() else {
            return false;
        };
        let depth = path.len() - 1;
        if depth < self.height - 1 {
            if let Some(child) = last.child_hash(self.is_left(leaf_key, depth)) {
                return child == self.zero_hashes[depth + 1];
            }
        }
        last.hash == self.zero_hashes[depth]
    }

    fn parent_node(&self, child: &Hash, sibling: &Hash, leaf_key: &U256, depth: usize) -> Node {
        let key = self.node_key(leaf_key, depth);
        if self.is_left(leaf_key, depth) {
            Node::internal(self.hasher(), child, sibling, key)
        } else {
            Node::internal(self.hasher(), sibling, child, key)
        }
    }

    async fn get_node(&self, hash: Hash, key: U256) -> SmtResult<Option<Node>> {
        let id = node::node_id(self.hasher(), &hash, &key);
        Ok(self.store.get(&id).await?.map(|value| Node::new(hash, value, key)))
    }

    async fn write_nodes(&self, nodes: &[Node]) -> SmtResult<()> {
        let ops: Vec<BatchOp> = nodes
            .iter()
            .filter_map(|n| {
                let value = n.value.clone()?;
                let id = n.id(self.hasher());
                debug!(
                    "Setting node {} (hash {}, {} bytes)",
                    short(&id),
                    short(&n.hash),
                    value.len()
                );
                Some(BatchOp::Put { key: id.to_vec(), value })
            })
            .collect();
        self.store.batch(ops).await?;
        Ok(())
    }

    fn is_left(&self, leaf_key: &U256, depth: usize) -> bool {
        node::is_left(leaf_key, depth, self.height)
    }

    fn node_key(&self, leaf_key: &U256, depth: usize) -> U256 {
        node::node_key(leaf_key, depth, self.height)
    }

    fn check_key(&self, key: &U256) -> SmtResult<()> {
        if self.height >= MAX_HEIGHT || (*key >> self.height).is_zero() {
            Ok(())
        } else {
            Err(SmtError::KeyOutOfRange { key: *key, height: self.height })
        }
    }

    fn check_sibling_count(&self, actual: usize) -> SmtResult<()> {
        let expected = self.height - 1;
        if actual == expected {
            Ok(())
        } else {
            Err(SmtError::InvalidProofLength { expected, actual })
        }
    }

    fn check_proof(&self, proof: &SmtProof) -> SmtResult<()> {
        self.check_sibling_count(proof.siblings.len())?;
        self.check_key(&proof.key)
    }
}
