//! # memo-odb
//!
//! Content-addressed object storage for memo.
//!
//! Objects are addressed by the BLAKE3 digest of their contents and stored
//! as `<root>/<oid[0:2]>/<oid[2:]>` on any [`FileSystem`]. The crate also
//! owns the link strategy engine used to materialize objects cheaply
//! (reflink, hardlink, symlink, copy) and the probe that reports which of
//! those work between two locations.

pub mod fs;
pub mod link;
pub mod local;
pub mod memory;
pub mod odb;
pub mod probe;
pub mod transfer;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fs::{FileSystem, FsKind};
pub use link::{LinkChain, LinkError, LinkMethod};
pub use local::LocalFs;
pub use memory::MemoryFs;
pub use odb::{
    hash_file, pull_objects, push_objects, CheckoutOutcome, ObjectDb, TransferReport, RUNS_DIR,
};
pub use probe::test_links;
pub use transfer::{transfer, TransferOutcome};

/// Errors that can occur in object store operations
#[derive(Error, Debug)]
pub enum OdbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error on {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("Object not found in cache: {oid}")]
    MissingObject { oid: String },

    #[error("Invalid object id '{value}': {reason}")]
    InvalidObjectId { value: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, OdbError>;

/// BLAKE3 content digest, 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(String);

impl ObjectId {
    pub const HEX_LEN: usize = 64;

    /// Parse and validate a hex digest.
    pub fn from_hex(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.len() != Self::HEX_LEN {
            return Err(OdbError::InvalidObjectId {
                value,
                reason: "expected 64 hex characters",
            });
        }
        if !value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(OdbError::InvalidObjectId {
                value,
                reason: "expected lowercase hex",
            });
        }
        Ok(Self(value))
    }

    /// Digest of an in-memory buffer.
    pub fn compute(data: &[u8]) -> Self {
        Self::from_digest(blake3::hash(data))
    }

    pub(crate) fn from_digest(hash: blake3::Hash) -> Self {
        Self(hex::encode(hash.as_bytes()))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Check a string without building an id.
    pub fn is_valid(value: &str) -> bool {
        Self::from_hex(value).is_ok()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = OdbError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(value)
    }
}

impl From<ObjectId> for String {
    fn from(oid: ObjectId) -> Self {
        oid.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_is_stable_hex() {
        let a = ObjectId::compute(b"hello");
        let b = ObjectId::compute(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.as_hex().len(), ObjectId::HEX_LEN);
        assert_ne!(a, ObjectId::compute(b"world"));
    }

    #[test]
    fn test_from_hex_validation() {
        let oid = ObjectId::compute(b"x");
        assert_eq!(ObjectId::from_hex(oid.as_hex()).unwrap(), oid);

        assert!(matches!(
            ObjectId::from_hex("abc"),
            Err(OdbError::InvalidObjectId { .. })
        ));
        assert!(!ObjectId::is_valid(&oid.as_hex().to_uppercase()));
        assert!(!ObjectId::is_valid(&"z".repeat(64)));
    }

    #[test]
    fn test_serde_rejects_invalid() {
        let oid = ObjectId::compute(b"x");
        let json = serde_json::to_string(&oid).unwrap();
        assert_eq!(json, format!("\"{}\"", oid));
        let back: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, oid);
        assert!(serde_json::from_str::<ObjectId>("\"nothex\"").is_err());
    }
}
