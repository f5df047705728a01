//! Cache transfer: sync the `runs` subtree between object databases.

use std::path::Path;

use memo_config::{log_transfer_debug, log_transfer_info};
use memo_odb::fs::{name, parent, relpath};
use memo_odb::{transfer as transfer_file, FileSystem, LinkChain, ObjectDb};

use crate::store::StageCache;
use crate::Result;

/// Whether `bucket` holds a finished entry. Temp files left by an
/// interrupted transfer don't count.
fn bucket_has_entry(fs: &dyn FileSystem, bucket: &Path) -> Result<bool> {
    if !fs.exists(bucket) {
        return Ok(false);
    }
    Ok(fs.find(bucket)?.iter().any(|p| !name(p).starts_with('.')))
}

/// Copy run-cache entries from `from` to `to`.
///
/// A destination bucket that already holds any entry is skipped as a whole,
/// so a second entry for a key already present remotely is not sent. Returns
/// the `(key, value)` names actually transferred.
pub fn transfer(from: &ObjectDb, to: &ObjectDb) -> Result<Vec<(String, String)>> {
    let from_fs = from.fs();
    let to_fs = to.fs();
    let runs = from.runs_dir();

    let mut transferred = Vec::new();
    if !from_fs.exists(&runs) {
        return Ok(transferred);
    }

    let chain = LinkChain::copy_only();
    for src in from_fs.find(&runs)? {
        let value = name(&src);
        if value.starts_with('.') {
            continue;
        }
        let Some(rel) = relpath(&src, from.root()) else {
            continue;
        };
        let dst = to.root().join(rel);
        let bucket = parent(&dst);
        if bucket_has_entry(to_fs, bucket)? {
            log_transfer_debug!(
                "Bucket already present, skipping",
                bucket = tracing::field::display(bucket.display()),
            );
            continue;
        }

        transfer_file(from_fs, &src, to_fs, &dst, &chain, from.progress())?;
        transferred.push((name(parent(&src)), value));
    }

    log_transfer_info!("Run-cache transfer finished", entries = transferred.len());
    Ok(transferred)
}

impl StageCache {
    /// Upload local entries to `remote`.
    pub fn push(&self, remote: &ObjectDb) -> Result<Vec<(String, String)>> {
        transfer(&self.odb, remote)
    }

    /// Download entries from `remote` into the local cache.
    pub fn pull(&self, remote: &ObjectDb) -> Result<Vec<(String, String)>> {
        transfer(remote, &self.odb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;

    use memo_odb::{FileSystem, LocalFs, MemoryFs};
    use tempfile::tempdir;

    fn put(fs: &dyn FileSystem, path: &Path, body: &str) {
        fs.put_file(&mut body.as_bytes(), path).unwrap();
    }

    #[test]
    fn test_push_then_skip() {
        let dir = tempdir().unwrap();
        let local = ObjectDb::local(dir.path().join("cache"));
        let runs = local.runs_dir();
        put(&LocalFs, &runs.join("ab/abc1/v1"), "cmd: a\n");
        put(&LocalFs, &runs.join("cd/cde2/v2"), "cmd: b\n");

        let remote = ObjectDb::new(Arc::new(MemoryFs::new()), "/remote");
        let mut sent = transfer(&local, &remote).unwrap();
        sent.sort();
        assert_eq!(
            sent,
            vec![
                ("abc1".to_string(), "v1".to_string()),
                ("cde2".to_string(), "v2".to_string())
            ]
        );
        assert!(remote.fs().exists(Path::new("/remote/runs/ab/abc1/v1")));

        // Second push finds both buckets populated
        assert!(transfer(&local, &remote).unwrap().is_empty());
    }

    #[test]
    fn test_bucket_with_any_entry_is_skipped() {
        let dir = tempdir().unwrap();
        let local = ObjectDb::local(dir.path().join("cache"));
        let runs = local.runs_dir();
        put(&LocalFs, &runs.join("ab/abc1/v1"), "cmd: a\n");
        put(&LocalFs, &runs.join("ab/abc1/v2"), "cmd: a\n");

        let remote = ObjectDb::local(dir.path().join("remote"));
        put(&LocalFs, &remote.runs_dir().join("ab/abc1/other"), "cmd: a\n");

        assert!(transfer(&local, &remote).unwrap().is_empty());
        assert!(!remote.runs_dir().join("ab/abc1/v1").exists());
    }

    #[test]
    fn test_stray_temp_file_does_not_block_bucket() {
        let dir = tempdir().unwrap();
        let local = ObjectDb::local(dir.path().join("cache"));
        put(&LocalFs, &local.runs_dir().join("ab/abc1/v1"), "cmd: a\n");

        let remote = ObjectDb::local(dir.path().join("remote"));
        put(&LocalFs, &remote.runs_dir().join("ab/abc1/.crashed.tmp"), "cmd");

        let sent = transfer(&local, &remote).unwrap();
        assert_eq!(sent, vec![("abc1".to_string(), "v1".to_string())]);
        assert!(remote.runs_dir().join("ab/abc1/v1").exists());
    }

    #[test]
    fn test_missing_runs_dir() {
        let dir = tempdir().unwrap();
        let local = ObjectDb::local(dir.path().join("empty"));
        let remote = ObjectDb::local(dir.path().join("remote"));
        assert!(transfer(&local, &remote).unwrap().is_empty());
    }

    #[test]
    fn test_temp_files_are_not_transferred() {
        let dir = tempdir().unwrap();
        let local = ObjectDb::local(dir.path().join("cache"));
        put(&LocalFs, &local.runs_dir().join("ab/abc1/.x.tmp"), "cmd: a");

        let remote = ObjectDb::local(dir.path().join("remote"));
        assert!(transfer(&local, &remote).unwrap().is_empty());
    }

    #[test]
    fn test_pull_into_local() {
        let dir = tempdir().unwrap();
        let mem = MemoryFs::new();
        let remote = ObjectDb::new(Arc::new(mem.clone()), "/remote");
        put(&mem, &remote.runs_dir().join("ef/ef01/v9"), "cmd: c\n");

        let local = ObjectDb::local(dir.path().join("cache"));
        let cache = StageCache::new(Arc::new(LocalFs), local.clone());
        let got = cache.pull(&remote).unwrap();
        assert_eq!(got, vec![("ef01".to_string(), "v9".to_string())]);
        assert_eq!(
            std::fs::read_to_string(local.runs_dir().join("ef/ef01/v9")).unwrap(),
            "cmd: c\n"
        );
    }
}
