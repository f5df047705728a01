//! # memo-stage
//!
//! Pipeline stage model for memo: stages with their dependencies and
//! outputs, the lockfile document recording a realized run, its schema, and
//! the `memo.lock` pipeline lock.

pub mod document;
pub mod lock;
pub mod schema;
pub mod stage;

use thiserror::Error;

pub use document::{load_lock, load_yaml, LoadError};
pub use lock::{
    acquire, lock_file_path, LockEntry, PipelineLock, StageLock, DEFAULT_LOCK_TIMEOUT,
    PIPELINE_LOCK_FILE,
};
pub use schema::{validate, SchemaError};
pub use stage::{scheme, Dependency, Output, Stage, UsedObjects, LOCAL_SCHEME};

/// Errors that can occur in stage operations
#[derive(Error, Debug)]
pub enum StageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Odb(#[from] memo_odb::OdbError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("dependency '{path}' does not exist")]
    MissingDependency { path: String },

    #[error("output '{path}' does not exist")]
    MissingOutput { path: String },

    #[error("timed out after {:?} waiting for lock {}", .waited, .path.display())]
    LockTimeout {
        path: std::path::PathBuf,
        waited: std::time::Duration,
    },
}

pub type Result<T> = std::result::Result<T, StageError>;
