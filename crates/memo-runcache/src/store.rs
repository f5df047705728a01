//! Run-cache store.
//!
//! Entries live at `<odb root>/runs/<key[0:2]>/<key>/<value>`, one YAML
//! lockfile each. An entry is written once through a temp file in its bucket
//! and a rename, and is only ever deleted when it fails validation on load.

use std::path::PathBuf;
use std::sync::Arc;

use memo_config::{log_runcache_debug, log_runcache_warn};
use memo_odb::fs::name;
use memo_odb::{FileSystem, LinkChain, ObjectDb};
use memo_stage::{load_lock, validate, LoadError, Stage, StageLock};

use crate::key::{lock_key, lock_value, stage_key, CacheKey, CacheValue};
use crate::{Result, RunCacheError};

/// Temp files are dot-prefixed so lookups never mistake them for entries.
fn is_temp_name(name: &str) -> bool {
    name.starts_with('.')
}

/// Run-cache bound to a workspace and a local object database.
#[derive(Debug, Clone)]
pub struct StageCache {
    pub(crate) workspace: Arc<dyn FileSystem>,
    pub(crate) odb: ObjectDb,
    pub(crate) remote: Option<ObjectDb>,
}

impl StageCache {
    pub fn new(workspace: Arc<dyn FileSystem>, odb: ObjectDb) -> Self {
        Self {
            workspace,
            odb,
            remote: None,
        }
    }

    /// Remote used when restore is asked to pull.
    pub fn with_remote(mut self, remote: ObjectDb) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn odb(&self) -> &ObjectDb {
        &self.odb
    }

    pub fn workspace(&self) -> &dyn FileSystem {
        self.workspace.as_ref()
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.odb.runs_dir()
    }

    pub fn bucket_dir(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir().join(key.shard()).join(key.as_str())
    }

    pub fn entry_path(&self, key: &CacheKey, value: &CacheValue) -> PathBuf {
        self.bucket_dir(key).join(value.as_str())
    }

    /// Load one entry.
    ///
    /// A missing file is `None`. A corrupt or schema-invalid file is logged,
    /// deleted, and also reported as `None`.
    pub fn load_entry(&self, key: &CacheKey, value: &CacheValue) -> Result<Option<StageLock>> {
        let path = self.entry_path(key, value);
        let fs = self.odb.fs();
        match load_lock(fs, &path) {
            Ok(lock) => Ok(Some(lock)),
            Err(LoadError::Missing { .. }) => Ok(None),
            Err(e) if e.is_corrupt() => {
                log_runcache_warn!(
                    "corrupted cache file",
                    path = tracing::field::display(path.display()),
                    error = tracing::field::display(&e),
                );
                fs.remove(&path)?;
                Ok(None)
            }
            Err(e) => Err(RunCacheError::Load(e)),
        }
    }

    /// First valid entry recorded for the stage's recipe.
    pub fn load(&self, stage: &Stage) -> Result<Option<StageLock>> {
        let Some(key) = stage_key(stage)? else {
            return Ok(None);
        };

        let bucket = self.bucket_dir(&key);
        let fs = self.odb.fs();
        if !fs.exists(&bucket) {
            return Ok(None);
        }

        for path in fs.ls(&bucket)? {
            let value = name(&path);
            if is_temp_name(&value) {
                continue;
            }
            if let Some(lock) = self.load_entry(&key, &CacheValue::new(value))? {
                return Ok(Some(lock));
            }
        }
        Ok(None)
    }

    /// Record the result of a finished stage.
    ///
    /// Returns the entry address, or `None` when the stage is not cacheable.
    /// Saving a result that is already recorded only re-commits the outputs
    /// declared without caching.
    pub fn save(&self, stage: &Stage) -> Result<Option<(CacheKey, CacheValue)>> {
        let Some(key) = stage_key(stage)? else {
            return Ok(None);
        };
        let fresh = stage.to_lockfile();
        let value = lock_value(&fresh)?;

        let existing = self.load_entry(&key, &value)?;
        let cache = existing.clone().unwrap_or(fresh);

        self.commit_uncached_outs(stage, &cache)?;

        if existing.is_some() {
            log_runcache_debug!("Entry already recorded", key = key.as_str());
            return Ok(Some((key, value)));
        }

        validate(&cache).map_err(RunCacheError::Schema)?;

        let fs = self.odb.fs();
        let bucket = self.bucket_dir(&key);
        fs.makedirs(&bucket)?;
        let tmp = bucket.join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        let yaml = cache.to_yaml()?;
        fs.put_file(&mut yaml.as_bytes(), &tmp)?;
        if let Err(e) = fs.move_file(&tmp, &self.entry_path(&key, &value)) {
            let _ = fs.remove(&tmp);
            return Err(e.into());
        }

        log_runcache_debug!(
            "Entry saved",
            stage = stage.name.as_str(),
            key = key.as_str(),
            value = value.as_str(),
        );
        Ok(Some((key, value)))
    }

    /// Commit outputs declared with caching disabled, by full copy.
    ///
    /// They go through a stage rebuilt from `cache` so the caller's stage is
    /// left untouched.
    fn commit_uncached_outs(&self, stage: &Stage, cache: &StageLock) -> Result<()> {
        let uncached: Vec<&str> = stage
            .outs
            .iter()
            .filter(|out| !out.use_cache)
            .map(|out| out.def_path.as_str())
            .collect();
        if uncached.is_empty() {
            return Ok(());
        }

        let mut cached_stage = Stage::from_lock(stage.name.clone(), cache, stage.wdir.clone());
        let copy = LinkChain::copy_only();
        for out in cached_stage
            .outs
            .iter_mut()
            .filter(|out| uncached.contains(&out.def_path.as_str()))
        {
            out.commit(self.workspace(), &stage.wdir, &self.odb, Some(&copy))?;
        }
        Ok(())
    }

    /// Address of the entry a recorded lockfile would be stored under.
    pub fn address_of(lock: &StageLock) -> Result<(CacheKey, CacheValue)> {
        Ok((lock_key(lock)?, lock_value(lock)?))
    }

    /// Every entry currently on disk, in listing order. Temp files are skipped.
    pub fn entries(&self) -> Result<Vec<(CacheKey, CacheValue)>> {
        let fs = self.odb.fs();
        let root = self.cache_dir();
        let mut entries = Vec::new();
        for path in fs.find(&root)? {
            let value = name(&path);
            if is_temp_name(&value) {
                continue;
            }
            let Some(bucket) = path.parent() else {
                continue;
            };
            entries.push((CacheKey::new(name(bucket)), CacheValue::new(value)));
        }
        Ok(entries)
    }
}
