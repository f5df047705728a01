//! Objects referenced by recorded runs, for garbage collection.

use memo_config::log_runcache_debug;
use memo_stage::{Stage, UsedObjects};

use crate::key::{CacheKey, CacheValue};
use crate::store::StageCache;

impl StageCache {
    /// Union of the objects referenced by the given entries.
    ///
    /// Entries that are missing or fail to load are skipped.
    pub fn get_used_objs<'a, I>(&self, used_run_cache: I) -> UsedObjects
    where
        I: IntoIterator<Item = &'a (CacheKey, CacheValue)>,
    {
        let mut used = UsedObjects::new();
        for (key, value) in used_run_cache {
            let entry = match self.load_entry(key, value) {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    log_runcache_debug!(
                        "Skipping unreadable entry",
                        key = key.as_str(),
                        error = tracing::field::display(&e),
                    );
                    continue;
                }
            };
            let stage = Stage::from_lock(key.as_str(), &entry, "");
            for (odb, objs) in stage.get_used_objs() {
                used.entry(odb).or_default().extend(objs);
            }
        }
        used
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use memo_odb::{LocalFs, ObjectDb, ObjectId};
    use memo_stage::{Dependency, Output};
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_used_objs_union_and_skip_missing() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let cache = StageCache::new(
            Arc::new(LocalFs),
            ObjectDb::local(dir.path().join("cache")),
        );

        let mut addresses = Vec::new();
        let mut expected = BTreeSet::new();
        for (i, body) in [b"one".as_slice(), b"two".as_slice()].into_iter().enumerate() {
            std::fs::write(work.join("in"), format!("input {i}")).unwrap();
            std::fs::write(work.join("out"), body).unwrap();
            let mut stage = Stage::new("s", "produce", &work)
                .with_dep(Dependency::new("in"))
                .with_out(Output::new("out"));
            stage.save_deps(&LocalFs).unwrap();
            stage.commit_outs(&LocalFs, cache.odb()).unwrap();
            addresses.push(cache.save(&stage).unwrap().unwrap());
            expected.insert(ObjectId::compute(body));
        }
        addresses.push((CacheKey::new("ffff"), CacheValue::new("gone")));

        let used = cache.get_used_objs(&addresses);
        assert_eq!(used.len(), 1);
        assert_eq!(used[&None], expected);
    }
}
