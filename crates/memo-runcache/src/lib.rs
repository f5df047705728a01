//! # memo-runcache
//!
//! Run-level memoization for memo pipelines.
//!
//! Before a stage runs, [`StageCache::restore`] looks for a recorded run of
//! the same recipe (command, dependency hashes, output paths) and checks its
//! outputs out instead of executing. After a stage runs,
//! [`StageCache::save`] records the result. Entries live in the `runs`
//! subtree of the local object database and are synced to remotes with
//! [`StageCache::push`] and [`StageCache::pull`].

pub mod key;
pub mod repo;
pub mod restore;
pub mod store;
pub mod sync;
pub mod used;

use thiserror::Error;

pub use key::{can_hash, lock_key, lock_value, stage_key, CacheKey, CacheValue};
pub use repo::Repo;
pub use restore::RestoreOptions;
pub use store::StageCache;

/// Errors that can occur in run-cache operations
#[derive(Error, Debug)]
pub enum RunCacheError {
    /// No usable recorded run: execute the stage normally.
    #[error("No run-cache for {stage}")]
    NotFound { stage: String },

    /// A lockfile about to be saved failed validation.
    #[error("refusing to save invalid run-cache entry: {0}")]
    Schema(#[source] memo_stage::SchemaError),

    #[error("objects for stage '{stage}' are missing after pull: {}", oids.join(", "))]
    MissingObjects { stage: String, oids: Vec<String> },

    #[error("no remote configured to pull from")]
    NoRemote,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Load(memo_stage::LoadError),

    #[error(transparent)]
    Stage(#[from] memo_stage::StageError),

    #[error(transparent)]
    Odb(#[from] memo_odb::OdbError),

    #[error(transparent)]
    Link(#[from] memo_odb::LinkError),

    #[error(transparent)]
    Config(#[from] memo_config::ConfigError),
}

impl RunCacheError {
    pub fn not_found(stage: &memo_stage::Stage) -> Self {
        RunCacheError::NotFound {
            stage: stage.name.clone(),
        }
    }

    /// The routing signal to fall back to normal execution.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RunCacheError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, RunCacheError>;
