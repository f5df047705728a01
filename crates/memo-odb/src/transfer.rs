//! Single-object transfer with already-exists idempotence.

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};

use crate::fs::{name, FileSystem};
use crate::link::{try_links, LinkChain, LinkError, LinkMethod};

/// What [`transfer`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Destination was created with this method.
    Linked(LinkMethod),
    /// Destination was already present and left as is.
    AlreadyExists,
}

impl TransferOutcome {
    pub fn method(&self) -> Option<LinkMethod> {
        match self {
            TransferOutcome::Linked(method) => Some(*method),
            TransferOutcome::AlreadyExists => None,
        }
    }
}

/// Byte progress bar for one file; hidden when `enabled` is false.
pub fn file_progress(enabled: bool, desc: &str) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("{msg} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_message(desc.to_string());
    pb
}

/// Materialize `from` at `to` using `chain`.
///
/// An existing destination counts as success: the file is content-addressed
/// or a run-cache entry, so whatever is there already has the right bytes.
pub fn transfer(
    from_fs: &dyn FileSystem,
    from: &Path,
    to_fs: &dyn FileSystem,
    to: &Path,
    chain: &LinkChain,
    progress_enabled: bool,
) -> Result<TransferOutcome, LinkError> {
    let pb = file_progress(progress_enabled, &name(from));
    let result = try_links(chain.methods(), from_fs, from, to_fs, to, &pb);
    pb.finish_and_clear();

    match result {
        Ok(method) => {
            tracing::trace!(method = %method, to = %to.display(), "Transferred");
            Ok(TransferOutcome::Linked(method))
        }
        Err(LinkError::AlreadyExists { path, .. }) => {
            tracing::debug!(path = %path.display(), "'{}' already exists", path.display());
            Ok(TransferOutcome::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalFs;
    use crate::memory::MemoryFs;
    use tempfile::tempdir;

    #[test]
    fn test_transfer_existing_destination_is_success() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        std::fs::write(&src, b"new").unwrap();
        std::fs::write(&dst, b"old").unwrap();

        let outcome = transfer(&LocalFs, &src, &LocalFs, &dst, &LinkChain::default(), false)
            .unwrap();
        assert_eq!(outcome, TransferOutcome::AlreadyExists);
        assert_eq!(outcome.method(), None);
        assert_eq!(std::fs::read(&dst).unwrap(), b"old");
    }

    #[test]
    fn test_transfer_local_to_memory_copies() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::write(&src, b"bytes").unwrap();

        let mem = MemoryFs::new();
        let chain = LinkChain::new(true, None).unwrap();
        let outcome = transfer(&LocalFs, &src, &mem, Path::new("/r/dst"), &chain, false).unwrap();
        assert_eq!(outcome.method(), Some(LinkMethod::Copy));
        assert_eq!(mem.size(Path::new("/r/dst")).unwrap(), 5);
    }

    #[test]
    fn test_transfer_propagates_real_errors() {
        let mem = MemoryFs::new();
        let err = transfer(
            &mem,
            Path::new("/missing"),
            &mem,
            Path::new("/dst"),
            &LinkChain::copy_only(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, LinkError::Io(_)));
    }
}
