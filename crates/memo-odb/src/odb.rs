//! Content-addressed object database.
//!
//! Layout: `<root>/<oid[0:2]>/<oid[2:]>`. Run-cache entries live in a
//! separate subtree, `<root>/runs/`, managed by `memo-runcache`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::fs::FileSystem;
use crate::link::LinkChain;
use crate::local::LocalFs;
use crate::transfer::{transfer, TransferOutcome};
use crate::{ObjectId, OdbError, Result};

/// Name of the run-cache subtree below an object database root.
pub const RUNS_DIR: &str = "runs";

/// What [`ObjectDb::checkout`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// Workspace file already had the right contents.
    UpToDate,
    /// Workspace file was (re)created.
    Materialized(TransferOutcome),
}

/// Result of moving a batch of objects between two databases.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Objects copied to the destination.
    pub transferred: Vec<ObjectId>,
    /// Objects absent from both sides.
    pub missing: Vec<ObjectId>,
}

/// Object database on some [`FileSystem`].
#[derive(Debug, Clone)]
pub struct ObjectDb {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    chain: LinkChain,
    progress: bool,
}

impl ObjectDb {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
            chain: LinkChain::default(),
            progress: false,
        }
    }

    /// Database on local disk.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(LocalFs), root)
    }

    /// Link chain used for checkouts and commits.
    pub fn with_chain(mut self, chain: LinkChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chain(&self) -> &LinkChain {
        &self.chain
    }

    pub fn progress(&self) -> bool {
        self.progress
    }

    /// Root of the run-cache subtree.
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join(RUNS_DIR)
    }

    pub fn oid_to_path(&self, oid: &ObjectId) -> PathBuf {
        let hex = oid.as_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    pub fn exists(&self, oid: &ObjectId) -> bool {
        self.fs.exists(&self.oid_to_path(oid))
    }

    /// Hash `path` on `from_fs` and store it, linking with `chain` or the
    /// database's own chain.
    pub fn add(
        &self,
        from_fs: &dyn FileSystem,
        path: &Path,
        chain: Option<&LinkChain>,
    ) -> Result<ObjectId> {
        let oid = hash_file(from_fs, path)?;
        let dest = self.oid_to_path(&oid);
        if self.fs.exists(&dest) {
            return Ok(oid);
        }
        let chain = chain.unwrap_or(&self.chain);
        let outcome = transfer(from_fs, path, self.fs(), &dest, chain, self.progress)?;
        tracing::debug!(
            oid = %oid,
            path = %path.display(),
            method = ?outcome.method(),
            "Object added"
        );
        Ok(oid)
    }

    /// Materialize object `oid` at `to` on `to_fs`.
    ///
    /// A file already holding the same contents is left in place; anything
    /// else at `to` is replaced.
    pub fn checkout(
        &self,
        oid: &ObjectId,
        to_fs: &dyn FileSystem,
        to: &Path,
        isexec: bool,
    ) -> Result<CheckoutOutcome> {
        let src = self.oid_to_path(oid);
        if !self.fs.exists(&src) {
            return Err(OdbError::MissingObject {
                oid: oid.to_string(),
            });
        }

        if to_fs.exists(to) {
            if !to_fs.is_dir(to) && hash_file(to_fs, to)? == *oid {
                if isexec {
                    to_fs.set_executable(to)?;
                }
                return Ok(CheckoutOutcome::UpToDate);
            }
            to_fs.remove(to)?;
        }

        let outcome = transfer(self.fs(), &src, to_fs, to, &self.chain, self.progress)?;
        if isexec {
            to_fs.set_executable(to)?;
        }
        Ok(CheckoutOutcome::Materialized(outcome))
    }

    /// Copy `oids` from `self` into `dest`.
    ///
    /// Objects already in `dest` are skipped. Objects missing from both
    /// sides are reported rather than failing the batch.
    pub fn transfer_objects<'a>(
        &self,
        dest: &ObjectDb,
        oids: impl IntoIterator<Item = &'a ObjectId>,
    ) -> Result<TransferReport> {
        let mut report = TransferReport::default();
        let chain = LinkChain::default();
        for oid in oids {
            if dest.exists(oid) {
                continue;
            }
            if !self.exists(oid) {
                report.missing.push(oid.clone());
                continue;
            }
            let from = self.oid_to_path(oid);
            let to = dest.oid_to_path(oid);
            if let TransferOutcome::Linked(_) =
                transfer(self.fs(), &from, dest.fs(), &to, &chain, self.progress)?
            {
                report.transferred.push(oid.clone());
            }
        }
        Ok(report)
    }
}

/// Fetch `oids` from `remote` into `local`.
pub fn pull_objects<'a>(
    remote: &ObjectDb,
    local: &ObjectDb,
    oids: impl IntoIterator<Item = &'a ObjectId>,
) -> Result<TransferReport> {
    remote.transfer_objects(local, oids)
}

/// Upload `oids` from `local` to `remote`.
pub fn push_objects<'a>(
    local: &ObjectDb,
    remote: &ObjectDb,
    oids: impl IntoIterator<Item = &'a ObjectId>,
) -> Result<TransferReport> {
    local.transfer_objects(remote, oids)
}

/// BLAKE3 digest of a file's contents.
pub fn hash_file(fs: &dyn FileSystem, path: &Path) -> Result<ObjectId> {
    let mut reader = fs.open(path).map_err(|source| OdbError::File {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|source| OdbError::File {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(ObjectId::from_digest(hasher.finalize()))
}
