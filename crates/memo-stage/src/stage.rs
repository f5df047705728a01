//! Stage model.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use memo_odb::{hash_file, FileSystem, LinkChain, ObjectDb, ObjectId};

use crate::lock::{LockEntry, StageLock};
use crate::{Result, StageError};

/// Scheme name for plain filesystem paths.
pub const LOCAL_SCHEME: &str = "local";

/// Objects referenced by a stage, grouped by owning store (`None` = the
/// local cache).
pub type UsedObjects = BTreeMap<Option<String>, BTreeSet<ObjectId>>;

/// `"s3"` for `s3://bucket/key`, [`LOCAL_SCHEME`] for anything without a
/// `<scheme>://` prefix.
pub fn scheme(path: &str) -> &str {
    match path.find("://") {
        Some(idx)
            if idx > 0
                && path[..idx]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) =>
        {
            &path[..idx]
        }
        _ => LOCAL_SCHEME,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub def_path: String,
    pub hash: Option<ObjectId>,
    pub size: Option<u64>,
}

impl Dependency {
    pub fn new(def_path: impl Into<String>) -> Self {
        Self {
            def_path: def_path.into(),
            hash: None,
            size: None,
        }
    }

    pub fn scheme(&self) -> &str {
        scheme(&self.def_path)
    }

    fn to_entry(&self) -> LockEntry {
        LockEntry {
            hash: self.hash.clone(),
            size: self.size,
            ..LockEntry::new(self.def_path.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub def_path: String,
    pub hash: Option<ObjectId>,
    pub size: Option<u64>,
    pub isexec: bool,
    /// Commit into the object store when the stage is committed.
    pub use_cache: bool,
    /// Keep the previous contents around between runs.
    pub persist: bool,
}

impl Output {
    pub fn new(def_path: impl Into<String>) -> Self {
        Self {
            def_path: def_path.into(),
            hash: None,
            size: None,
            isexec: false,
            use_cache: true,
            persist: false,
        }
    }

    pub fn scheme(&self) -> &str {
        scheme(&self.def_path)
    }

    fn to_entry(&self) -> LockEntry {
        LockEntry {
            hash: self.hash.clone(),
            size: self.size,
            isexec: self.isexec,
            ..LockEntry::new(self.def_path.clone())
        }
    }

    /// Store the workspace file in `odb`, recording its hash.
    ///
    /// `chain` overrides the database's link chain for this one commit.
    pub fn commit(
        &mut self,
        fs: &dyn FileSystem,
        wdir: &Path,
        odb: &ObjectDb,
        chain: Option<&LinkChain>,
    ) -> Result<ObjectId> {
        let path = wdir.join(&self.def_path);
        if !fs.exists(&path) {
            return Err(StageError::MissingOutput {
                path: self.def_path.clone(),
            });
        }
        let oid = odb.add(fs, &path, chain)?;
        self.size = Some(fs.size(&path)?);
        self.isexec = fs.is_executable(&path);
        self.hash = Some(oid.clone());
        Ok(oid)
    }
}

/// One command-driven pipeline step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub cmd: String,
    /// Directory dependency and output paths are relative to.
    pub wdir: PathBuf,
    pub deps: Vec<Dependency>,
    pub outs: Vec<Output>,
    pub is_callback: bool,
    pub always_changed: bool,
    /// Last recorded run from the pipeline lock.
    pub locked: Option<StageLock>,
}

impl Stage {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>, wdir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            wdir: wdir.into(),
            deps: Vec::new(),
            outs: Vec::new(),
            is_callback: false,
            always_changed: false,
            locked: None,
        }
    }

    pub fn with_dep(mut self, dep: Dependency) -> Self {
        self.deps.push(dep);
        self
    }

    pub fn with_out(mut self, out: Output) -> Self {
        self.outs.push(out);
        self
    }

    pub fn path_of(&self, def_path: &str) -> PathBuf {
        self.wdir.join(def_path)
    }

    /// Lockfile for the stage's current in-memory state.
    ///
    /// Entries are sorted by path so the document is independent of
    /// declaration order.
    pub fn to_lockfile(&self) -> StageLock {
        let mut deps: Vec<LockEntry> = self.deps.iter().map(Dependency::to_entry).collect();
        let mut outs: Vec<LockEntry> = self.outs.iter().map(Output::to_entry).collect();
        deps.sort_by(|a, b| a.path.cmp(&b.path));
        outs.sort_by(|a, b| a.path.cmp(&b.path));
        StageLock {
            cmd: self.cmd.clone(),
            deps,
            outs,
        }
    }

    /// Stage reconstructed from a recorded run.
    ///
    /// Every output is cached, whatever the original declaration said: a
    /// recorded run has all its outputs in the object store.
    pub fn from_lock(name: impl Into<String>, lock: &StageLock, wdir: impl Into<PathBuf>) -> Self {
        let deps = lock
            .deps
            .iter()
            .map(|entry| Dependency {
                def_path: entry.path.clone(),
                hash: entry.hash.clone(),
                size: entry.size,
            })
            .collect();
        let outs = lock
            .outs
            .iter()
            .map(|entry| Output {
                hash: entry.hash.clone(),
                size: entry.size,
                isexec: entry.isexec,
                ..Output::new(entry.path.clone())
            })
            .collect();
        Self {
            deps,
            outs,
            locked: Some(lock.clone()),
            ..Self::new(name, lock.cmd.clone(), wdir)
        }
    }

    /// Whether the definition (command, dependency and output paths) differs
    /// from the last recorded run.
    pub fn changed_stage(&self) -> bool {
        let Some(locked) = &self.locked else {
            return true;
        };
        if locked.cmd != self.cmd {
            return true;
        }
        let dep_paths: BTreeSet<&str> = self.deps.iter().map(|d| d.def_path.as_str()).collect();
        let out_paths: BTreeSet<&str> = self.outs.iter().map(|o| o.def_path.as_str()).collect();
        let locked_deps: BTreeSet<&str> = locked.deps.iter().map(|d| d.path.as_str()).collect();
        let locked_outs: BTreeSet<&str> = locked.outs.iter().map(|o| o.path.as_str()).collect();
        dep_paths != locked_deps || out_paths != locked_outs
    }

    /// Copy recorded hashes from [`Stage::locked`] onto dependencies and
    /// outputs with the same path.
    pub fn fill_from_lock(&mut self) {
        let Some(locked) = &self.locked else {
            return;
        };
        for dep in &mut self.deps {
            if let Some(entry) = locked.deps.iter().find(|e| e.path == dep.def_path) {
                dep.hash = entry.hash.clone();
                dep.size = entry.size;
            }
        }
        for out in &mut self.outs {
            if let Some(entry) = locked.outs.iter().find(|e| e.path == out.def_path) {
                out.hash = entry.hash.clone();
                out.size = entry.size;
                out.isexec = entry.isexec;
            }
        }
    }

    /// Every dependency has a hash that still matches the workspace file.
    pub fn deps_cached(&self, fs: &dyn FileSystem) -> bool {
        self.deps.iter().all(|dep| {
            let Some(recorded) = &dep.hash else {
                return false;
            };
            let path = self.path_of(&dep.def_path);
            fs.exists(&path)
                && hash_file(fs, &path)
                    .map(|actual| &actual == recorded)
                    .unwrap_or(false)
        })
    }

    /// Recompute dependency hashes from the workspace.
    pub fn save_deps(&mut self, fs: &dyn FileSystem) -> Result<()> {
        for dep in &mut self.deps {
            if dep.scheme() != LOCAL_SCHEME {
                continue;
            }
            let path = self.wdir.join(&dep.def_path);
            if !fs.exists(&path) {
                return Err(StageError::MissingDependency {
                    path: dep.def_path.clone(),
                });
            }
            dep.hash = Some(hash_file(fs, &path)?);
            dep.size = Some(fs.size(&path)?);
        }
        Ok(())
    }

    /// Recompute output hashes from the workspace without committing them.
    pub fn save_outs(&mut self, fs: &dyn FileSystem) -> Result<()> {
        for out in &mut self.outs {
            let path = self.wdir.join(&out.def_path);
            if !fs.exists(&path) {
                return Err(StageError::MissingOutput {
                    path: out.def_path.clone(),
                });
            }
            out.hash = Some(hash_file(fs, &path)?);
            out.size = Some(fs.size(&path)?);
            out.isexec = fs.is_executable(&path);
        }
        Ok(())
    }

    /// Every output has a hash whose object is present in `odb`.
    pub fn outs_cached(&self, odb: &ObjectDb) -> bool {
        self.outs
            .iter()
            .all(|out| out.hash.as_ref().is_some_and(|oid| odb.exists(oid)))
    }

    /// Commit cached outputs into `odb`; uncached ones only get hashed.
    pub fn commit_outs(&mut self, fs: &dyn FileSystem, odb: &ObjectDb) -> Result<()> {
        let wdir = self.wdir.clone();
        for out in &mut self.outs {
            if out.use_cache {
                out.commit(fs, &wdir, odb, None)?;
            } else {
                let path = wdir.join(&out.def_path);
                if !fs.exists(&path) {
                    return Err(StageError::MissingOutput {
                        path: out.def_path.clone(),
                    });
                }
                out.hash = Some(hash_file(fs, &path)?);
                out.size = Some(fs.size(&path)?);
                out.isexec = fs.is_executable(&path);
            }
        }
        Ok(())
    }

    /// Materialize every output from `odb` onto the workspace.
    pub fn checkout(&self, fs: &dyn FileSystem, odb: &ObjectDb) -> Result<()> {
        for out in &self.outs {
            let oid = out.hash.as_ref().ok_or_else(|| StageError::MissingOutput {
                path: out.def_path.clone(),
            })?;
            let path = self.path_of(&out.def_path);
            let outcome = odb.checkout(oid, fs, &path, out.isexec)?;
            tracing::debug!(
                stage = %self.name,
                path = %out.def_path,
                outcome = ?outcome,
                "Checked out output"
            );
        }
        Ok(())
    }

    /// Objects the cached outputs refer to.
    pub fn get_used_objs(&self) -> UsedObjects {
        let mut used = UsedObjects::new();
        for out in self.outs.iter().filter(|o| o.use_cache) {
            if let Some(oid) = &out.hash {
                used.entry(None).or_default().insert(oid.clone());
            }
        }
        used
    }
}
