//! Configuration

use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{SmtError, SmtResult};
use crate::hasher::{Keccak256Hasher, NodeHasher, Sha256Hasher};
use crate::{Hash, DEFAULT_HEIGHT};

/// Hash function selection
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HasherKind {
    /// Keccak-256 (default)
    #[default]
    Keccak256,
    /// SHA-256
    Sha256,
}

impl From<&str> for HasherKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Self::Sha256,
            _ => Self::Keccak256,
        }
    }
}

impl HasherKind {
    /// Instantiate the selected hasher
    pub fn build(self) -> Box<dyn NodeHasher> {
        match self {
            Self::Keccak256 => Box::new(Keccak256Hasher),
            Self::Sha256 => Box::new(Sha256Hasher),
        }
    }
}

/// Tree configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SmtConfig {
    /// Levels from root to leaf, inclusive
    pub height: usize,
    /// Node hash function
    pub hasher: HasherKind,
    /// Prefix applied to every storage key of this tree
    pub namespace: Option<String>,
    /// 0x-prefixed hex root to resume from
    pub root_hash: Option<String>,
}

impl Default for SmtConfig {
    fn default() -> Self {
        Self {
            height: DEFAULT_HEIGHT,
            hasher: HasherKind::default(),
            namespace: None,
            root_hash: None,
        }
    }
}

impl SmtConfig {
    /// Load from environment variables
    pub fn from_env() -> SmtResult<Self> {
        let height = match env::var("SMT_HEIGHT") {
            Ok(s) => s
                .parse()
                .map_err(|_| SmtError::Config(format!("SMT_HEIGHT is not a number: {s}")))?,
            Err(_) => DEFAULT_HEIGHT,
        };

        Ok(Self {
            height,
            hasher: env::var("SMT_HASHER")
                .map(|s| HasherKind::from(s.as_str()))
                .unwrap_or_default(),
            namespace: env::var("SMT_NAMESPACE").ok().filter(|s| !s.is_empty()),
            root_hash: env::var("SMT_ROOT_HASH").ok().filter(|s| !s.is_empty()),
        })
    }

    /// Decoded resume root, if configured
    pub fn root_hash(&self) -> SmtResult<Option<Hash>> {
        let Some(raw) = &self.root_hash else {
            return Ok(None);
        };
        let bytes = hex::decode(raw.trim_start_matches("0x"))
            .map_err(|e| SmtError::InvalidRootHash(e.to_string()))?;
        let hash: Hash = bytes
            .try_into()
            .map_err(|b: Vec<u8>| {
                SmtError::InvalidRootHash(format!("root hash must be 32 bytes, got {}", b.len()))
            })?;
        Ok(Some(hash))
    }

    /// Storage key prefix for this tree
    pub fn key_prefix(&self) -> Vec<u8> {
        self.namespace.as_deref().map(|ns| format!("{ns}:").into_bytes()).unwrap_or_default()
    }
}
