//! Restore protocol: replay a recorded run instead of executing the stage.

use memo_config::{log_runcache_debug, log_runcache_info};
use memo_odb::pull_objects;
use memo_stage::Stage;

use crate::key::can_hash;
use crate::store::StageCache;
use crate::{Result, RunCacheError};

/// Caller switches for [`StageCache::restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Consult recorded entries. When off, only the pipeline-lock fast path
    /// can succeed.
    pub run_cache: bool,
    /// Fetch referenced objects from the remote before checking out.
    pub pull: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            run_cache: true,
            pull: false,
        }
    }
}

impl StageCache {
    /// Check out the outputs of a previous run of `stage`.
    ///
    /// On success the stage has not been executed and its outputs are in the
    /// workspace; the returned stage carries the replayed lockfile. Any
    /// reason the run can't be replayed yields [`RunCacheError::NotFound`],
    /// which callers answer by executing the stage.
    pub fn restore(&self, stage: &mut Stage, opts: RestoreOptions) -> Result<Stage> {
        if !can_hash(stage) {
            return Err(RunCacheError::not_found(stage));
        }

        let fast_path = !stage.changed_stage()
            && stage.deps_cached(self.workspace())
            && stage.outs.iter().all(|out| out.hash.is_some());

        let cache = if fast_path {
            log_runcache_debug!("Stage unchanged since last run", stage = stage.name.as_str());
            stage.to_lockfile()
        } else {
            if !opts.run_cache {
                return Err(RunCacheError::not_found(stage));
            }
            stage.save_deps(self.workspace())?;
            match self.load(stage)? {
                Some(cache) => cache,
                None => return Err(RunCacheError::not_found(stage)),
            }
        };

        let cached_stage = Stage::from_lock(stage.name.clone(), &cache, stage.wdir.clone());

        if opts.pull {
            let remote = self.remote.as_ref().ok_or(RunCacheError::NoRemote)?;
            for objs in cached_stage.get_used_objs().values() {
                let report = pull_objects(remote, &self.odb, objs)?;
                if !report.missing.is_empty() {
                    return Err(RunCacheError::MissingObjects {
                        stage: stage.name.clone(),
                        oids: report.missing.iter().map(ToString::to_string).collect(),
                    });
                }
            }
        }

        if !cached_stage.outs_cached(&self.odb) {
            return Err(RunCacheError::not_found(stage));
        }

        log_runcache_info!(
            "Stage is cached - skipping run, checking out outputs",
            stage = stage.name.as_str(),
        );
        cached_stage.checkout(self.workspace(), &self.odb)?;
        Ok(cached_stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use memo_odb::{LocalFs, MemoryFs, ObjectDb, ObjectId};
    use memo_stage::{Dependency, Output};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        work: PathBuf,
        cache: StageCache,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let odb = ObjectDb::local(dir.path().join("cache"));
        Fixture {
            work,
            cache: StageCache::new(Arc::new(LocalFs), odb),
            _dir: dir,
        }
    }

    /// Stage as declared by the user, dependency hashes freshly computed.
    fn declared(fx: &Fixture) -> Stage {
        let mut stage = Stage::new("greet", "echo hi > o1", &fx.work)
            .with_dep(Dependency::new("d1"))
            .with_out(Output::new("o1"));
        stage.save_deps(&LocalFs).unwrap();
        stage
    }

    /// Write inputs, "run" the command, commit and save.
    fn run_and_save(fx: &Fixture) -> Stage {
        std::fs::write(fx.work.join("d1"), b"dep").unwrap();
        std::fs::write(fx.work.join("o1"), b"hi\n").unwrap();
        let mut stage = declared(fx);
        stage.commit_outs(&LocalFs, fx.cache.odb()).unwrap();
        fx.cache.save(&stage).unwrap().unwrap();
        stage
    }

    #[test]
    fn test_restore_round_trip() {
        let fx = fixture();
        let ran = run_and_save(&fx);
        std::fs::remove_file(fx.work.join("o1")).unwrap();

        // Fresh declaration, nothing locked
        let mut stage = declared(&fx);
        let restored = fx.cache.restore(&mut stage, RestoreOptions::default()).unwrap();

        assert_eq!(std::fs::read(fx.work.join("o1")).unwrap(), b"hi\n");
        assert_eq!(restored.outs[0].hash, ran.outs[0].hash);
        assert_eq!(restored.outs[0].size, Some(3));
        assert_eq!(stage.deps[0].hash, Some(ObjectId::compute(b"dep")));
    }

    #[test]
    fn test_restore_miss_when_dependency_changed() {
        let fx = fixture();
        run_and_save(&fx);
        std::fs::write(fx.work.join("d1"), b"different").unwrap();

        let mut stage = declared(&fx);
        let err = fx
            .cache
            .restore(&mut stage, RestoreOptions::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_restore_not_cacheable() {
        let fx = fixture();
        run_and_save(&fx);
        let mut stage = declared(&fx);
        stage.always_changed = true;
        let err = fx
            .cache
            .restore(&mut stage, RestoreOptions::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_restore_without_run_cache() {
        let fx = fixture();
        run_and_save(&fx);

        // Declaration with no recorded state can't take the fast path
        let mut stage = declared(&fx);
        let opts = RestoreOptions {
            run_cache: false,
            pull: false,
        };
        assert!(fx.cache.restore(&mut stage, opts).unwrap_err().is_not_found());
    }

    #[test]
    fn test_fast_path_uses_locked_state() {
        let fx = fixture();
        let ran = run_and_save(&fx);
        // Remove the run-cache entirely: only the locked state remains
        std::fs::remove_dir_all(fx.cache.cache_dir()).unwrap();
        std::fs::remove_file(fx.work.join("o1")).unwrap();

        let mut stage = ran.clone();
        stage.locked = Some(ran.to_lockfile());
        let opts = RestoreOptions {
            run_cache: false,
            pull: false,
        };
        fx.cache.restore(&mut stage, opts).unwrap();
        assert_eq!(std::fs::read(fx.work.join("o1")).unwrap(), b"hi\n");
    }

    #[test]
    fn test_partial_objects_is_miss() {
        let fx = fixture();
        let ran = run_and_save(&fx);
        let oid = ran.outs[0].hash.clone().unwrap();
        std::fs::remove_file(fx.cache.odb().oid_to_path(&oid)).unwrap();

        let mut stage = declared(&fx);
        let err = fx
            .cache
            .restore(&mut stage, RestoreOptions::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_pull_fetches_missing_objects() {
        let fx = fixture();
        let ran = run_and_save(&fx);
        let oid = ran.outs[0].hash.clone().unwrap();

        let remote = ObjectDb::new(Arc::new(MemoryFs::new()), "/remote");
        fx.cache.odb().transfer_objects(&remote, [&oid]).unwrap();
        std::fs::remove_file(fx.cache.odb().oid_to_path(&oid)).unwrap();
        std::fs::remove_file(fx.work.join("o1")).unwrap();

        let cache = fx.cache.clone().with_remote(remote);
        let mut stage = declared(&fx);
        let opts = RestoreOptions {
            run_cache: true,
            pull: true,
        };
        cache.restore(&mut stage, opts).unwrap();
        assert!(cache.odb().exists(&oid));
        assert_eq!(std::fs::read(fx.work.join("o1")).unwrap(), b"hi\n");
    }

    #[test]
    fn test_pull_missing_everywhere_is_hard_failure() {
        let fx = fixture();
        let ran = run_and_save(&fx);
        let oid = ran.outs[0].hash.clone().unwrap();
        std::fs::remove_file(fx.cache.odb().oid_to_path(&oid)).unwrap();

        let remote = ObjectDb::new(Arc::new(MemoryFs::new()), "/remote");
        let cache = fx.cache.clone().with_remote(remote);
        let mut stage = declared(&fx);
        let opts = RestoreOptions {
            run_cache: true,
            pull: true,
        };
        let err = cache.restore(&mut stage, opts).unwrap_err();
        assert!(matches!(err, RunCacheError::MissingObjects { .. }));
    }

    #[test]
    fn test_pull_without_remote() {
        let fx = fixture();
        run_and_save(&fx);
        let mut stage = declared(&fx);
        let opts = RestoreOptions {
            run_cache: true,
            pull: true,
        };
        let err = fx.cache.restore(&mut stage, opts).unwrap_err();
        assert!(matches!(err, RunCacheError::NoRemote));
    }
}
