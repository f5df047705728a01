//! Repository context: workspace, local cache and remotes built from config.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use memo_config::{path, Config, ENV_LOCK_TIMEOUT};
use memo_odb::{FileSystem, LinkChain, LocalFs, MemoryFs, ObjectDb};
use memo_stage::{PipelineLock, StageLock, DEFAULT_LOCK_TIMEOUT, PIPELINE_LOCK_FILE};

use crate::store::StageCache;
use crate::Result;

/// URL scheme selecting the in-process store.
pub const MEMORY_SCHEME: &str = "memory://";

/// Everything an operation needs to reach the workspace and the caches.
#[derive(Debug, Clone)]
pub struct Repo {
    root: PathBuf,
    config: Config,
    workspace: Arc<dyn FileSystem>,
    odb: ObjectDb,
    memory: MemoryFs,
}

impl Repo {
    /// Open the project at `root` with its layered configuration.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = Config::load(&root)?;
        Self::with_config(root, config)
    }

    pub fn with_config(root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let root = root.into();
        let chain = LinkChain::from_names(config.cache.hardlink, &config.cache.link_types)?;
        let odb = ObjectDb::local(config.cache_dir(&root))
            .with_chain(chain)
            .with_progress(config.progress.enabled);
        Ok(Self {
            root,
            config,
            workspace: Arc::new(LocalFs),
            odb,
            memory: MemoryFs::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workspace(&self) -> &dyn FileSystem {
        self.workspace.as_ref()
    }

    pub fn odb(&self) -> &ObjectDb {
        &self.odb
    }

    /// Object database of a configured remote (`None` = default remote).
    pub fn remote_odb(&self, name: Option<&str>) -> Result<ObjectDb> {
        let (name, remote) = self.config.remote(name)?;
        let odb = match remote.url.strip_prefix(MEMORY_SCHEME) {
            Some(rest) => {
                let root = Path::new("/").join(if rest.is_empty() { name } else { rest });
                ObjectDb::new(Arc::new(self.memory.clone()), root)
            }
            None => ObjectDb::local(path::resolve(&self.root, Path::new(&remote.url))),
        };
        Ok(odb.with_progress(self.config.progress.enabled))
    }

    /// Run-cache bound to this repository.
    ///
    /// The default remote, if one is configured, serves restore-time pulls.
    pub fn stage_cache(&self) -> Result<StageCache> {
        let cache = StageCache::new(Arc::clone(&self.workspace), self.odb.clone());
        if self.config.core.remote.is_none() {
            return Ok(cache);
        }
        Ok(cache.with_remote(self.remote_odb(None)?))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(PIPELINE_LOCK_FILE)
    }

    pub fn load_lock(&self) -> Result<PipelineLock> {
        Ok(PipelineLock::load(self.lock_path())?)
    }

    /// Record `lock` as the last run of `stage` in `memo.lock`.
    ///
    /// The file is re-read under its exclusive lock, so entries other
    /// processes wrote since [`Repo::load_lock`] survive.
    pub fn record_stage(&self, stage: &str, lock: StageLock) -> Result<PipelineLock> {
        Ok(PipelineLock::update(
            self.lock_path(),
            lock_timeout(|key| std::env::var(key).ok()),
            |pipeline| pipeline.set(stage, lock),
        )?)
    }
}

fn lock_timeout<F>(lookup: F) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(ENV_LOCK_TIMEOUT)
        .and_then(|s| s.trim().parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_LOCK_TIMEOUT)
}
