//! Link capability probe.
//!
//! Answers "which link methods actually work between these two locations"
//! by linking a tiny scratch file and verifying the result. Scratch files are
//! removed on every exit path.

use std::io;
use std::path::{Path, PathBuf};

use indicatif::ProgressBar;

use crate::fs::FileSystem;
use crate::link::{try_links, LinkMethod};

/// Bytes written to the probe source file.
pub const PROBE_CONTENTS: &[u8] = b"test";

/// Unique scratch file name.
pub fn tmp_fname() -> String {
    format!(".{}.tmp", uuid::Uuid::new_v4().simple())
}

/// Removes a scratch file when dropped.
struct Scratch<'a> {
    fs: &'a dyn FileSystem,
    path: PathBuf,
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        if self.fs.exists(&self.path) {
            if let Err(e) = self.fs.remove(&self.path) {
                tracing::debug!(path = %self.path.display(), error = %e, "Failed to remove probe file");
            }
        }
    }
}

/// Methods from `methods` that work from `from_dir` into `to_dir`, in order.
///
/// Both directories are created if missing. Fails only when the probe source
/// file cannot be written.
pub fn test_links(
    methods: &[LinkMethod],
    from_fs: &dyn FileSystem,
    from_dir: &Path,
    to_fs: &dyn FileSystem,
    to_dir: &Path,
) -> io::Result<Vec<LinkMethod>> {
    let from_file = from_dir.join(tmp_fname());
    let to_file = to_dir.join(tmp_fname());

    from_fs.makedirs(from_dir)?;
    from_fs.put_file(&mut &PROBE_CONTENTS[..], &from_file)?;
    let _source = Scratch {
        fs: from_fs,
        path: from_file.clone(),
    };

    to_fs.makedirs(to_dir)?;

    let mut usable = Vec::new();
    for &method in methods {
        let _dest = Scratch {
            fs: to_fs,
            path: to_file.clone(),
        };
        if test_link(method, from_fs, &from_file, to_fs, &to_file) {
            usable.push(method);
        }
    }
    Ok(usable)
}

fn test_link(
    method: LinkMethod,
    from_fs: &dyn FileSystem,
    from_file: &Path,
    to_fs: &dyn FileSystem,
    to_file: &Path,
) -> bool {
    if let Err(e) = try_links(
        &[method],
        from_fs,
        from_file,
        to_fs,
        to_file,
        &ProgressBar::hidden(),
    ) {
        tracing::debug!(method = %method, error = %e, "Link probe failed");
        return false;
    }
    to_fs.is_link(method, to_file).unwrap_or(true)
}
