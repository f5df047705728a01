//! Link strategy engine.
//!
//! Materializes a file at a destination by trying an ordered list of link
//! methods and falling through to the next one when a method is unavailable:
//! 1. reflink (copy-on-write clone)
//! 2. hardlink (same inode, opt-in)
//! 3. copy (always works)
//!
//! A destination that already exists stops the chain immediately.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};

use crate::fs::{FileSystem, FsKind};

/// How a file gets materialized at its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMethod {
    /// Copy-on-write clone (FICLONE/clonefile)
    Reflink,
    /// Hard link (same inode)
    Hardlink,
    /// Symbolic link
    Symlink,
    /// Full data copy
    Copy,
}

impl LinkMethod {
    pub const ALL: [LinkMethod; 4] = [
        LinkMethod::Reflink,
        LinkMethod::Hardlink,
        LinkMethod::Symlink,
        LinkMethod::Copy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkMethod::Reflink => "reflink",
            LinkMethod::Hardlink => "hardlink",
            LinkMethod::Symlink => "symlink",
            LinkMethod::Copy => "copy",
        }
    }
}

impl fmt::Display for LinkMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkMethod {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LinkMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| LinkError::UnknownMethod(s.to_string()))
    }
}

/// Error type for link operations
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("can't {method} across filesystems ({from} -> {to})")]
    CrossDevice {
        method: LinkMethod,
        from: FsKind,
        to: FsKind,
    },

    #[error("'{method}' is not supported by the {kind} filesystem")]
    Unsupported {
        method: LinkMethod,
        kind: FsKind,
        #[source]
        source: io::Error,
    },

    #[error("no more link types left to try out")]
    Exhausted {
        #[source]
        last: Option<Box<LinkError>>,
    },

    #[error("destination already exists: {}", path.display())]
    AlreadyExists {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'hardlink' and an explicit list of link types are mutually exclusive")]
    InvalidChain,

    #[error("unknown link type '{0}'")]
    UnknownMethod(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// `true` for "destination already exists" errors.
///
/// Windows reports these through raw codes ERROR_FILE_EXISTS (80) and
/// ERROR_ALREADY_EXISTS (183) from some APIs.
pub fn is_already_exists(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::AlreadyExists {
        return true;
    }
    cfg!(windows) && matches!(err.raw_os_error(), Some(80) | Some(183))
}

/// Ordered list of link methods to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkChain {
    methods: Vec<LinkMethod>,
}

impl LinkChain {
    /// Build a chain from the `hardlink` shortcut or an explicit list.
    ///
    /// Without an explicit list the chain is reflink, copy, or reflink,
    /// hardlink, copy when `hardlink` is set. Giving both is an error.
    pub fn new(hardlink: bool, links: Option<Vec<LinkMethod>>) -> Result<Self, LinkError> {
        let links = links.filter(|l| !l.is_empty());
        let methods = match (hardlink, links) {
            (true, Some(_)) => return Err(LinkError::InvalidChain),
            (false, Some(links)) => links,
            (true, None) => vec![LinkMethod::Reflink, LinkMethod::Hardlink, LinkMethod::Copy],
            (false, None) => vec![LinkMethod::Reflink, LinkMethod::Copy],
        };
        Ok(Self { methods })
    }

    /// Like [`LinkChain::new`] with link type names as found in config files.
    pub fn from_names(hardlink: bool, names: &[String]) -> Result<Self, LinkError> {
        let links = names
            .iter()
            .map(|n| n.parse())
            .collect::<Result<Vec<LinkMethod>, _>>()?;
        Self::new(hardlink, Some(links))
    }

    /// Chain with a single method.
    pub fn only(method: LinkMethod) -> Self {
        Self {
            methods: vec![method],
        }
    }

    pub fn copy_only() -> Self {
        Self::only(LinkMethod::Copy)
    }

    pub fn methods(&self) -> &[LinkMethod] {
        &self.methods
    }
}

impl Default for LinkChain {
    fn default() -> Self {
        Self {
            methods: vec![LinkMethod::Reflink, LinkMethod::Copy],
        }
    }
}

/// Copy `from` into a new file at `to`, reporting bytes to `progress`.
pub fn copy(
    from_fs: &dyn FileSystem,
    from: &Path,
    to_fs: &dyn FileSystem,
    to: &Path,
    progress: &ProgressBar,
) -> io::Result<u64> {
    if let Ok(size) = from_fs.size(from) {
        progress.set_length(size);
    }
    let reader = from_fs.open(from)?;
    let mut reader = progress.wrap_read(reader);
    to_fs.put_file(&mut reader, to)
}

/// Materialize `from` at `to` with exactly one method.
///
/// Non-copy methods between filesystems of different kinds fail with
/// [`LinkError::CrossDevice`] without touching either side. Any other
/// failure except "already exists" maps to [`LinkError::Unsupported`].
pub fn link(
    method: LinkMethod,
    from_fs: &dyn FileSystem,
    from: &Path,
    to_fs: &dyn FileSystem,
    to: &Path,
    progress: &ProgressBar,
) -> Result<(), LinkError> {
    let result = match method {
        LinkMethod::Copy => {
            return copy(from_fs, from, to_fs, to, progress)
                .map(|_| ())
                .map_err(|e| classify_copy_error(e, to));
        }
        _ if from_fs.kind() != to_fs.kind() => {
            return Err(LinkError::CrossDevice {
                method,
                from: from_fs.kind(),
                to: to_fs.kind(),
            });
        }
        LinkMethod::Reflink => to_fs.reflink(from, to),
        LinkMethod::Hardlink => to_fs.hardlink(from, to),
        LinkMethod::Symlink => to_fs.symlink(from, to),
    };

    result.map_err(|source| {
        if is_already_exists(&source) {
            LinkError::AlreadyExists {
                path: to.to_path_buf(),
                source,
            }
        } else {
            LinkError::Unsupported {
                method,
                kind: to_fs.kind(),
                source,
            }
        }
    })
}

fn classify_copy_error(err: io::Error, to: &Path) -> LinkError {
    if is_already_exists(&err) {
        LinkError::AlreadyExists {
            path: to.to_path_buf(),
            source: err,
        }
    } else {
        LinkError::Io(err)
    }
}

/// Try each method in order and return the one that worked.
///
/// Unavailable methods (cross-device or unsupported) fall through to the
/// next; any other error stops the chain. Running out of methods yields
/// [`LinkError::Exhausted`] carrying the last failure.
pub fn try_links(
    methods: &[LinkMethod],
    from_fs: &dyn FileSystem,
    from: &Path,
    to_fs: &dyn FileSystem,
    to: &Path,
    progress: &ProgressBar,
) -> Result<LinkMethod, LinkError> {
    let mut last = None;
    for &method in methods {
        match link(method, from_fs, from, to_fs, to, progress) {
            Ok(()) => return Ok(method),
            Err(e @ (LinkError::CrossDevice { .. } | LinkError::Unsupported { .. })) => {
                tracing::debug!(
                    method = %method,
                    error = %e,
                    "Link method unavailable, trying next"
                );
                last = Some(Box::new(e));
            }
            Err(e) => return Err(e),
        }
    }
    Err(LinkError::Exhausted { last })
}
