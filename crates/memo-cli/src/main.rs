//! # memo CLI
//!
//! Command-line interface for memo: run pipeline stages through the
//! run-cache and sync recorded runs with remotes.

mod run;
mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memo_config::logging::{init_logging, LogLevel};
use memo_config::{log_cli_debug, Config};
use memo_odb::{test_links, FileSystem, LinkMethod, LocalFs};
use memo_runcache::{Repo, StageCache};

#[derive(Parser)]
#[command(name = "memo")]
#[command(version, about = "Run-level memoization for pipeline stages", long_about = None)]
struct Cli {
    /// Project root
    #[arg(long, global = true, default_value = ".", value_name = "DIR")]
    root: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a stage, or restore its outputs from a recorded run
    Run(run::RunArgs),

    /// Upload run-cache entries and the objects they reference
    Push {
        /// Remote name (defaults to core.remote)
        #[arg(short, long)]
        remote: Option<String>,
    },

    /// Download run-cache entries and the objects they reference
    Pull {
        /// Remote name (defaults to core.remote)
        #[arg(short, long)]
        remote: Option<String>,
    },

    /// Report which link methods work between the cache and a directory
    Links {
        #[arg(long, value_name = "DIR")]
        to: PathBuf,
    },

    /// List objects referenced by the runs recorded in memo.lock
    Used,

    /// Show configuration
    Config {
        /// Print built-in defaults instead of the effective configuration
        #[arg(long)]
        default: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));
    log_cli_debug!(
        "Starting",
        root = tracing::field::display(cli.root.display()),
    );

    if let Commands::Config { default } = cli.command {
        return cmd_config(&cli.root, default);
    }

    let repo = Repo::open(&cli.root)
        .with_context(|| format!("Failed to open project at {}", cli.root.display()))?;
    match cli.command {
        Commands::Run(args) => run::run(&repo, args),
        Commands::Push { remote } => sync::push(&repo, remote.as_deref()),
        Commands::Pull { remote } => sync::pull(&repo, remote.as_deref()),
        Commands::Links { to } => cmd_links(&repo, &to),
        Commands::Used => cmd_used(&repo),
        Commands::Config { .. } => Ok(()),
    }
}

fn cmd_config(root: &std::path::Path, default: bool) -> Result<()> {
    let toml = if default {
        Config::default_toml()?
    } else {
        Config::load(root)
            .context("Failed to load configuration")?
            .to_toml()?
    };
    print!("{toml}");
    Ok(())
}

fn cmd_links(repo: &Repo, to: &std::path::Path) -> Result<()> {
    let odb = repo.odb();
    odb.fs()
        .makedirs(odb.root())
        .with_context(|| format!("Failed to create {}", odb.root().display()))?;
    LocalFs
        .makedirs(to)
        .with_context(|| format!("Failed to create {}", to.display()))?;

    let supported = test_links(&LinkMethod::ALL, odb.fs(), odb.root(), &LocalFs, to)
        .context("Link probe failed")?;
    for method in LinkMethod::ALL {
        let mark = if supported.contains(&method) { "yes" } else { "no" };
        println!("{:<9} {}", method.as_str(), mark);
    }
    Ok(())
}

fn cmd_used(repo: &Repo) -> Result<()> {
    let lock = repo.load_lock().context("Failed to load memo.lock")?;
    let addresses = lock
        .stages
        .values()
        .map(StageCache::address_of)
        .collect::<memo_runcache::Result<Vec<_>>>()?;

    let cache = repo.stage_cache()?;
    for (odb, oids) in cache.get_used_objs(&addresses) {
        let label = odb.as_deref().unwrap_or("local");
        for oid in oids {
            println!("{label}\t{oid}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "memo", "run", "--name", "train", "--dep", "data.csv", "--out", "model.bin", "--",
            "python", "train.py", "--epochs", "3",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.name, "train");
        assert_eq!(args.deps, vec!["data.csv"]);
        assert_eq!(args.outs, vec!["model.bin"]);
        assert_eq!(args.command, vec!["python", "train.py", "--epochs", "3"]);
        assert!(!args.no_run_cache);
        assert!(!args.pull);
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["memo", "push", "-r", "backup", "--root", "/p", "-vv"])
            .unwrap();
        assert_eq!(cli.root, PathBuf::from("/p"));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Push { remote: Some(ref r) } if r == "backup"));
    }

    #[test]
    fn test_run_requires_command() {
        assert!(Cli::try_parse_from(["memo", "run", "--name", "s"]).is_err());
    }

    #[test]
    fn test_links_requires_target() {
        assert!(Cli::try_parse_from(["memo", "links"]).is_err());
    }
}
