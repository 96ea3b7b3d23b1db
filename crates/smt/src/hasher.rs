//! Node hashers for the SMT

use std::fmt::Debug;

use sha2::{Digest, Sha256};
use tiny_keccak::{Hasher, Keccak};

use crate::Hash;

/// Fixed-output hash function used for node digests and storage ids
pub trait NodeHasher: Debug + Send + Sync {
    /// Hash a single value
    fn hash(&self, data: &[u8]) -> Hash;

    /// Hash two 32-byte values together (`left ‖ right`)
    fn hash_pair(&self, left: &Hash, right: &Hash) -> Hash {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(left);
        buf[32..].copy_from_slice(right);
        self.hash(&buf)
    }
}

/// Keccak256 hasher (default)
#[derive(Clone, Copy, Debug, Default)]
pub struct Keccak256Hasher;

impl NodeHasher for Keccak256Hasher {
    fn hash(&self, data: &[u8]) -> Hash {
        let mut hasher = Keccak::v256();
        hasher.update(data);
        let mut output = [0u8; 32];
        hasher.finalize(&mut output);
        output
    }

    fn hash_pair(&self, left: &Hash, right: &Hash) -> Hash {
        let mut hasher = Keccak::v256();
        hasher.update(left);
        hasher.update(right);
        let mut output = [0u8; 32];
        hasher.finalize(&mut output);
        output
    }
}

/// SHA-256 hasher
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256Hasher;

impl NodeHasher for Sha256Hasher {
    fn hash(&self, data: &[u8]) -> Hash {
        let mut output = [0u8; 32];
        output.copy_from_slice(&Sha256::digest(data));
        output
    }
}
