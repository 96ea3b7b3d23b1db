//! Key-value storage backing the tree

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// A single write in a storage batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite `key`
    Put {
        /// Storage key
        key: Vec<u8>,
        /// Bytes to store
        value: Vec<u8>,
    },
    /// Remove `key` if present
    Delete {
        /// Storage key
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// Key touched by this operation
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Byte-keyed storage with atomic batched writes
///
/// A batch must be applied as a unit: either every operation is visible
/// afterwards or none is.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Apply `ops` atomically, in order
    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key).await
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        (**self).batch(ops).await
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Whether `key` is present
    pub async fn contains(&self, key: &[u8]) -> bool {
        self.entries.read().await.contains_key(key)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// Store view that prepends a fixed namespace to every key
///
/// Lets several trees share one backend without their node ids colliding.
#[derive(Clone, Debug)]
pub struct PrefixedStore<S> {
    prefix: Vec<u8>,
    inner: S,
}

impl<S> PrefixedStore<S> {
    /// Wrap `inner`, namespacing every key under `prefix`
    pub fn new(prefix: impl Into<Vec<u8>>, inner: S) -> Self {
        Self { prefix: prefix.into(), inner }
    }

    /// Namespace prefix
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Wrapped store
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    fn namespaced(&self, key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + key.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(key);
        out
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for PrefixedStore<S> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(&self.namespaced(key)).await
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let ops = ops
            .into_iter()
            .map(|op| match op {
                BatchOp::Put { key, value } => BatchOp::Put { key: self.namespaced(&key), value },
                BatchOp::Delete { key } => BatchOp::Delete { key: self.namespaced(&key) },
            })
            .collect();
        self.inner.batch(ops).await
    }
}
