//! `memo run`: restore a stage from the run-cache or execute it.

use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::Args;
use memo_config::path::is_contained;
use memo_config::{log_cli_debug, log_cli_info};
use memo_runcache::{Repo, RestoreOptions};
use memo_stage::{Dependency, Output, Stage};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Stage name, the key in memo.lock
    #[arg(short, long)]
    pub name: String,

    /// Dependency path (repeatable)
    #[arg(short, long = "dep", value_name = "PATH")]
    pub deps: Vec<String>,

    /// Output path committed to the cache (repeatable)
    #[arg(short, long = "out", value_name = "PATH")]
    pub outs: Vec<String>,

    /// Output path tracked but not committed to the cache (repeatable)
    #[arg(long = "out-no-cache", value_name = "PATH")]
    pub outs_no_cache: Vec<String>,

    /// Output path kept between runs; disables the run-cache for the stage
    #[arg(long = "out-persist", value_name = "PATH")]
    pub outs_persist: Vec<String>,

    /// Skip the run-cache lookup (an unchanged locked stage is still skipped)
    #[arg(long)]
    pub no_run_cache: bool,

    /// Fetch missing objects from the default remote when restoring
    #[arg(long)]
    pub pull: bool,

    /// Command to execute (via `sh -c`)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Build the stage described by `args`, rooted at `root`.
pub fn build_stage(root: &Path, args: &RunArgs) -> Result<Stage> {
    let mut stage = Stage::new(&args.name, args.command.join(" "), root);
    for path in &args.deps {
        check_path(path)?;
        stage = stage.with_dep(Dependency::new(path));
    }
    for path in &args.outs {
        check_path(path)?;
        stage = stage.with_out(Output::new(path));
    }
    for path in &args.outs_no_cache {
        check_path(path)?;
        stage = stage.with_out(Output {
            use_cache: false,
            ..Output::new(path)
        });
    }
    for path in &args.outs_persist {
        check_path(path)?;
        stage = stage.with_out(Output {
            persist: true,
            ..Output::new(path)
        });
    }
    Ok(stage)
}

/// Workspace paths must stay under the project root.
fn check_path(path: &str) -> Result<()> {
    if memo_stage::scheme(path) != memo_stage::LOCAL_SCHEME {
        return Ok(());
    }
    if !is_contained(Path::new(path)) {
        bail!("path '{path}' is outside the project root");
    }
    Ok(())
}

pub fn run(repo: &Repo, args: RunArgs) -> Result<()> {
    let mut stage = build_stage(repo.root(), &args)?;
    let lock = repo.load_lock().context("Failed to load memo.lock")?;
    stage.locked = lock.get(&stage.name).cloned();
    stage.fill_from_lock();

    // Without a usable lock the dependencies are hashed up front so the
    // run-cache can still be consulted.
    if stage.changed_stage() || stage.deps.iter().any(|d| d.hash.is_none()) {
        stage
            .save_deps(repo.workspace())
            .with_context(|| format!("Failed to hash dependencies of '{}'", stage.name))?;
    }

    let cache = repo.stage_cache()?;
    let opts = RestoreOptions {
        run_cache: repo.config().run_cache.enabled && !args.no_run_cache,
        pull: args.pull || repo.config().run_cache.pull,
    };

    let recorded = match cache.restore(&mut stage, opts) {
        Ok(restored) => {
            println!("Stage '{}' is cached - skipping run", stage.name);
            restored.to_lockfile()
        }
        Err(e) if e.is_not_found() => {
            log_cli_debug!("Run-cache miss", stage = stage.name.as_str());
            execute(repo, &mut stage)?;
            stage.to_lockfile()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to restore '{}'", stage.name));
        }
    };

    repo.record_stage(&stage.name, recorded)
        .context("Failed to update memo.lock")?;
    Ok(())
}

/// Run the command, then commit outputs and record the run.
///
/// Dependencies are hashed again before saving: the entry must be keyed by
/// the inputs the command actually read, not by what `memo.lock` recorded.
fn execute(repo: &Repo, stage: &mut Stage) -> Result<()> {
    let fs = repo.workspace();
    for out in stage.outs.iter().filter(|o| !o.persist) {
        let path = stage.path_of(&out.def_path);
        if fs.exists(&path) {
            fs.remove(&path)
                .with_context(|| format!("Failed to remove stale output {}", path.display()))?;
        }
    }

    println!("Running stage '{}':\n> {}", stage.name, stage.cmd);
    let status = Command::new("sh")
        .arg("-c")
        .arg(&stage.cmd)
        .current_dir(&stage.wdir)
        .status()
        .context("Failed to spawn shell")?;
    if !status.success() {
        bail!("stage '{}' failed: {}", stage.name, status);
    }

    stage
        .save_deps(fs)
        .with_context(|| format!("Failed to hash dependencies of '{}'", stage.name))?;
    stage
        .commit_outs(fs, repo.odb())
        .with_context(|| format!("Failed to commit outputs of '{}'", stage.name))?;

    let saved = repo.stage_cache()?.save(stage)?;
    if let Some((key, value)) = saved {
        log_cli_info!(
            "Recorded run",
            stage = stage.name.as_str(),
            key = key.as_str(),
            value = value.as_str(),
        );
    }
    Ok(())
}
