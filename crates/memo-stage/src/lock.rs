//! Lockfile documents.
//!
//! A [`StageLock`] is the realized record of one stage run: its command, the
//! hashes of its dependencies and the hashes/sizes/exec bits of its outputs.
//! The same document is stored per stage in `memo.lock` and per run in the
//! run-cache.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use memo_odb::ObjectId;
use serde::{Deserialize, Serialize};

use crate::document::{self, LoadError};
use crate::{Result, StageError};

/// File name of the pipeline lock at the project root.
pub const PIPELINE_LOCK_FILE: &str = "memo.lock";

/// How long [`PipelineLock::update`] waits for another process by default.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

fn is_false(value: &bool) -> bool {
    !*value
}

/// One dependency or output line of a lockfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockEntry {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfiles: Option<u64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub isexec: bool,
}

impl LockEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: None,
            size: None,
            nfiles: None,
            isexec: false,
        }
    }

    pub fn with_hash(mut self, hash: ObjectId, size: u64) -> Self {
        self.hash = Some(hash);
        self.size = Some(size);
        self
    }
}

/// Realized record of one stage run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageLock {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<LockEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outs: Vec<LockEntry>,
}

impl StageLock {
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Every object referenced by the outputs.
    pub fn out_hashes(&self) -> impl Iterator<Item = &ObjectId> {
        self.outs.iter().filter_map(|out| out.hash.as_ref())
    }
}

/// `memo.lock`: stage name to its last recorded run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineLock {
    #[serde(default)]
    pub stages: BTreeMap<String, StageLock>,
}

impl PipelineLock {
    /// Load from disk. A missing file is an empty lock.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let value = match document::load_yaml(&memo_odb::LocalFs, path) {
            Ok(value) => value,
            Err(LoadError::Missing { .. }) => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value).map_err(|e| {
            StageError::Load(LoadError::Corrupt {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        })
    }

    /// Save to disk, replacing the previous file atomically.
    ///
    /// Each call writes its own temp file, so concurrent savers never share
    /// one. Callers that modify a loaded lock should go through
    /// [`PipelineLock::update`] instead.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let tmp = sibling(path, &format!(".{}.tmp", uuid::Uuid::new_v4().simple()));

        let write = || -> Result<()> {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(&file);
            serde_yaml::to_writer(&mut writer, self)?;
            writer.flush()?;
            drop(writer);
            file.sync_all()?;
            fs::rename(&tmp, path)?;
            Ok(())
        };
        write().inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })
    }

    /// Load, modify and save `path` while holding its exclusive lock.
    ///
    /// Waits up to `timeout` for other holders. Only the stages `f` touches
    /// change; entries written by other processes in the meantime are kept.
    pub fn update<P, F>(path: P, timeout: Duration, f: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: FnOnce(&mut Self),
    {
        let path = path.as_ref();
        let _guard = acquire(path, timeout)?;
        let mut lock = Self::load(path)?;
        f(&mut lock);
        lock.save(path)?;
        Ok(lock)
    }

    pub fn get(&self, name: &str) -> Option<&StageLock> {
        self.stages.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, lock: StageLock) {
        self.stages.insert(name.into(), lock);
    }
}

/// `<dir>/<file name><suffix>` next to `path`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Sidecar file whose `flock` guards `path`.
pub fn lock_file_path(path: &Path) -> PathBuf {
    sibling(path, ".lck")
}

/// Take the exclusive lock on `path`'s sidecar, polling until `timeout`.
///
/// The lock is released when the returned file is dropped.
pub fn acquire(path: &Path, timeout: Duration) -> Result<File> {
    let lock_path = lock_file_path(path);
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;

    let start = Instant::now();
    loop {
        match lock_file.try_lock_exclusive() {
            Ok(()) => return Ok(lock_file),
            Err(e) if e.kind() == ErrorKind::WouldBlock || is_contended(&e) => {
                if start.elapsed() >= timeout {
                    return Err(StageError::LockTimeout {
                        path: lock_path,
                        waited: timeout,
                    });
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> StageLock {
        StageLock {
            cmd: "python train.py".to_string(),
            deps: vec![LockEntry::new("data.csv").with_hash(ObjectId::compute(b"data"), 4)],
            outs: vec![LockEntry {
                isexec: true,
                ..LockEntry::new("model.bin").with_hash(ObjectId::compute(b"model"), 5)
            }],
        }
    }

    #[test]
    fn test_yaml_shape() {
        let yaml = sample().to_yaml().unwrap();
        assert!(yaml.contains("cmd: python train.py"));
        assert!(yaml.contains("isexec: true"));
        // Unset optional fields are omitted
        assert!(!yaml.contains("nfiles"));
        let back: StageLock = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = "cmd: echo\nbogus: 1\n";
        assert!(serde_yaml::from_str::<StageLock>(yaml).is_err());
    }

    #[test]
    fn test_out_hashes() {
        let mut lock = sample();
        lock.outs.push(LockEntry::new("no-hash"));
        let hashes: Vec<_> = lock.out_hashes().collect();
        assert_eq!(hashes, vec![&ObjectId::compute(b"model")]);
    }

    #[test]
    fn test_pipeline_lock_missing_is_empty() {
        let dir = tempdir().unwrap();
        let lock = PipelineLock::load(dir.path().join(PIPELINE_LOCK_FILE)).unwrap();
        assert!(lock.stages.is_empty());
    }

    #[test]
    fn test_pipeline_lock_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PIPELINE_LOCK_FILE);

        let mut lock = PipelineLock::default();
        lock.set("train", sample());
        lock.save(&path).unwrap();

        let loaded = PipelineLock::load(&path).unwrap();
        assert_eq!(loaded.get("train"), Some(&sample()));

        // Only the lock itself is left behind
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(PIPELINE_LOCK_FILE)]);
    }

    #[test]
    fn test_update_keeps_other_stages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PIPELINE_LOCK_FILE);

        let mut lock = PipelineLock::default();
        lock.set("prepare", sample());
        lock.save(&path).unwrap();

        let updated = PipelineLock::update(&path, DEFAULT_LOCK_TIMEOUT, |lock| {
            lock.set("train", sample());
        })
        .unwrap();
        assert_eq!(updated.stages.len(), 2);
        assert_eq!(PipelineLock::load(&path).unwrap(), updated);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PIPELINE_LOCK_FILE);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    PipelineLock::update(&path, DEFAULT_LOCK_TIMEOUT, |lock| {
                        lock.set(format!("stage{i}"), sample());
                    })
                    .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let lock = PipelineLock::load(&path).unwrap();
        assert_eq!(lock.stages.len(), 8);
    }

    #[test]
    fn test_acquire_times_out_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PIPELINE_LOCK_FILE);

        let _held = acquire(&path, DEFAULT_LOCK_TIMEOUT).unwrap();
        let err = acquire(&path, Duration::from_millis(150)).unwrap_err();
        assert!(matches!(err, StageError::LockTimeout { .. }));
        assert_eq!(
            lock_file_path(&path),
            dir.path().join("memo.lock.lck")
        );
    }

    #[test]
    fn test_pipeline_lock_corrupt_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PIPELINE_LOCK_FILE);
        std::fs::write(&path, "stages: [unclosed").unwrap();
        assert!(PipelineLock::load(&path).is_err());
    }
}
