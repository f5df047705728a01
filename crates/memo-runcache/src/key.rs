//! Cacheability predicate and key/value derivation.
//!
//! Two digests address a run-cache entry:
//! - the key hashes the lockfile with outputs reduced to their paths, so every
//!   run of the same recipe lands in the same bucket;
//! - the value hashes the full lockfile, telling apart distinct results.
//!
//! Both drop the volatile `size` and `nfiles` fields and hash a canonical
//! JSON encoding with sorted keys.

use std::collections::BTreeMap;
use std::fmt;

use memo_stage::{Stage, StageLock, LOCAL_SCHEME};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::Result;

/// Fields left out of both digests.
pub const VOLATILE_FIELDS: &[&str] = &["size", "nfiles"];

/// Digest of a stage recipe (command, dependency hashes, output paths).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

/// Digest of one recorded result of a recipe.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheValue(String);

impl CacheKey {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First two characters, naming the shard directory.
    pub fn shard(&self) -> &str {
        self.0.get(..2).unwrap_or(&self.0)
    }
}

impl CacheValue {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether `stage` may use the run-cache at all.
pub fn can_hash(stage: &Stage) -> bool {
    if stage.is_callback || stage.always_changed {
        return false;
    }

    if stage.cmd.is_empty() || stage.deps.is_empty() || stage.outs.is_empty() {
        return false;
    }

    let deps_ok = stage.deps.iter().all(|dep| {
        dep.scheme() == LOCAL_SCHEME && !dep.def_path.is_empty() && dep.hash.is_some()
    });
    if !deps_ok {
        return false;
    }

    stage
        .outs
        .iter()
        .all(|out| out.scheme() == LOCAL_SCHEME && !out.def_path.is_empty() && !out.persist)
}

/// Rebuild `value` with `exclude` keys dropped at every depth and object
/// keys in sorted order.
fn canonicalize(value: Value, exclude: &[&str]) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .filter(|(k, _)| !exclude.contains(&k.as_str()))
                .map(|(k, v)| (k, canonicalize(v, exclude)))
                .collect();
            Value::Object(sorted.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| canonicalize(v, exclude))
                .collect(),
        ),
        other => other,
    }
}

/// SHA-256 hex digest of the canonical JSON form of `value`.
pub fn dict_sha256(value: Value, exclude: &[&str]) -> Result<String> {
    let canonical = canonicalize(value, exclude);
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

/// Value digest of a full lockfile.
pub fn lock_value(lock: &StageLock) -> Result<CacheValue> {
    let doc = serde_json::to_value(lock)?;
    Ok(CacheValue(dict_sha256(doc, VOLATILE_FIELDS)?))
}

/// Key digest of a lockfile: outputs reduced to their paths.
pub fn lock_key(lock: &StageLock) -> Result<CacheKey> {
    let mut doc = serde_json::to_value(lock)?;
    if let Value::Object(map) = &mut doc {
        let paths = lock
            .outs
            .iter()
            .map(|out| Value::String(out.path.clone()))
            .collect();
        map.insert("outs".to_string(), Value::Array(paths));
    }
    Ok(CacheKey(dict_sha256(doc, VOLATILE_FIELDS)?))
}

/// Key of a stage, or `None` when it is not cacheable.
pub fn stage_key(stage: &Stage) -> Result<Option<CacheKey>> {
    if !can_hash(stage) {
        return Ok(None);
    }
    lock_key(&stage.to_lockfile()).map(Some)
}
