//! Filesystem contract consumed by the object store and the run-cache.
//!
//! The object database, link engine and run-cache never touch `std::fs`
//! directly; they go through a [`FileSystem`] so the same code can move
//! data between a local cache and a remote store.

use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::link::LinkMethod;

/// Backend family of a [`FileSystem`].
///
/// Link methods other than `copy` only work between endpoints of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsKind {
    Local,
    Memory,
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsKind::Local => write!(f, "local"),
            FsKind::Memory => write!(f, "memory"),
        }
    }
}

/// Hierarchical byte-blob store (local disk or remote).
pub trait FileSystem: fmt::Debug + Send + Sync {
    /// Backend family, used to detect cross-device links.
    fn kind(&self) -> FsKind;

    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Immediate children of `dir`, sorted.
    fn ls(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Every file at or below `prefix`, sorted. A missing prefix yields nothing.
    fn find(&self, prefix: &Path) -> io::Result<Vec<PathBuf>>;

    fn size(&self, path: &Path) -> io::Result<u64>;

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Write the whole of `reader` to a new file at `path`.
    ///
    /// Parent directories are created. Fails with `ErrorKind::AlreadyExists`
    /// when `path` is already present; the existing file is left untouched.
    fn put_file(&self, reader: &mut dyn Read, path: &Path) -> io::Result<u64>;

    /// Create `dir` and its parents. Succeeds if it already exists.
    fn makedirs(&self, dir: &Path) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Atomically rename `src` to `dst`, replacing `dst` if present.
    fn move_file(&self, src: &Path, dst: &Path) -> io::Result<()>;

    fn reflink(&self, _src: &Path, _dst: &Path) -> io::Result<()> {
        Err(unsupported(self.kind(), LinkMethod::Reflink))
    }

    fn hardlink(&self, _src: &Path, _dst: &Path) -> io::Result<()> {
        Err(unsupported(self.kind(), LinkMethod::Hardlink))
    }

    fn symlink(&self, _src: &Path, _dst: &Path) -> io::Result<()> {
        Err(unsupported(self.kind(), LinkMethod::Symlink))
    }

    /// Check that `path` really is a `method` link.
    ///
    /// `None` means the backend has no verifier for that method.
    fn is_link(&self, _method: LinkMethod, _path: &Path) -> Option<bool> {
        None
    }

    fn set_executable(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn is_executable(&self, _path: &Path) -> bool {
        false
    }
}

pub(crate) fn unsupported(kind: FsKind, method: LinkMethod) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("'{method}' is not supported by the {kind} filesystem"),
    )
}

/// `path` relative to `base`, if `path` lies below it.
pub fn relpath(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(Path::to_path_buf)
}

/// Final component of `path` as a string (empty for roots).
pub fn name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parent of `path`, or `path` itself for roots.
pub fn parent(path: &Path) -> &Path {
    path.parent().unwrap_or(path)
}
