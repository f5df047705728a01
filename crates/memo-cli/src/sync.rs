//! `memo push` / `memo pull`: sync recorded runs and their objects.

use anyhow::{Context, Result};
use memo_config::log_cli_info;
use memo_odb::{pull_objects, push_objects, ObjectId, TransferReport};
use memo_runcache::{CacheKey, CacheValue, Repo};
use memo_stage::UsedObjects;

pub fn push(repo: &Repo, remote: Option<&str>) -> Result<()> {
    let cache = repo.stage_cache()?;
    let dest = repo
        .remote_odb(remote)
        .context("Failed to resolve remote")?;

    let entries = cache.push(&dest).context("Failed to push run-cache")?;
    let used = cache.get_used_objs(&cache.entries()?);
    let report = push_objects(repo.odb(), &dest, local_objects(&used))
        .context("Failed to push objects")?;

    summarize("pushed", entries.len(), &report);
    Ok(())
}

pub fn pull(repo: &Repo, remote: Option<&str>) -> Result<()> {
    let cache = repo.stage_cache()?;
    let src = repo
        .remote_odb(remote)
        .context("Failed to resolve remote")?;

    let entries = cache.pull(&src).context("Failed to pull run-cache")?;
    let addresses: Vec<(CacheKey, CacheValue)> = entries
        .iter()
        .map(|(key, value)| (CacheKey::new(key.as_str()), CacheValue::new(value.as_str())))
        .collect();
    let used = cache.get_used_objs(&addresses);
    let report = pull_objects(&src, repo.odb(), local_objects(&used))
        .context("Failed to pull objects")?;

    summarize("pulled", entries.len(), &report);
    Ok(())
}

fn local_objects(used: &UsedObjects) -> impl Iterator<Item = &ObjectId> {
    used.get(&None).into_iter().flatten()
}

fn summarize(verb: &str, entries: usize, report: &TransferReport) {
    log_cli_info!(
        "Sync finished",
        entries = entries,
        objects = report.transferred.len(),
        missing = report.missing.len(),
    );
    println!(
        "{} run-cache entries and {} objects {verb}",
        entries,
        report.transferred.len()
    );
    for oid in &report.missing {
        eprintln!("warning: object {oid} is missing from both caches");
    }
}
