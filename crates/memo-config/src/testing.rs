//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated project root (the working tree)
//! - A local object cache
//! - A filesystem remote for push/pull
//!
//! # Usage
//!
//! ```ignore
//! use memo_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     env.create_file("data/in.txt", b"input").unwrap();
//!     let config = env.config();
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{Config, RemoteConfig};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Name under which [`TestEnvironment::config`] registers the remote.
pub const TEST_REMOTE: &str = "test-remote";

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Project root (working tree) for the test
    pub project_root: PathBuf,
    /// Isolated local object cache
    pub cache_dir: PathBuf,
    /// Isolated filesystem remote
    pub remote_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let project_root = root.join("project");
        let cache_dir = root.join("cache");
        let remote_dir = root.join("remote");

        std::fs::create_dir_all(&project_root)?;
        std::fs::create_dir_all(&cache_dir)?;
        std::fs::create_dir_all(&remote_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            project_root,
            cache_dir,
            remote_dir,
            test_id,
        })
    }

    /// Config pointing at this environment's cache and remote.
    ///
    /// Progress bars are disabled.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.cache.dir = self.cache_dir.clone();
        cfg.progress.enabled = false;
        cfg.core.remote = Some(TEST_REMOTE.to_string());
        cfg.remote.insert(
            TEST_REMOTE.to_string(),
            RemoteConfig {
                url: self.remote_dir.to_string_lossy().into_owned(),
            },
        );
        cfg
    }

    /// Create a test file with content
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.project_root.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Read a file from the project root
    pub fn read_file(&self, relative_path: &str) -> anyhow::Result<Vec<u8>> {
        Ok(std::fs::read(self.project_root.join(relative_path))?)
    }

    /// Remove a file from the project root
    pub fn remove_file(&self, relative_path: &str) -> anyhow::Result<()> {
        std::fs::remove_file(self.project_root.join(relative_path))?;
        Ok(())
    }

    /// Path of the run-cache subtree inside the local cache
    pub fn runs_dir(&self) -> PathBuf {
        self.cache_dir.join("runs")
    }
}
