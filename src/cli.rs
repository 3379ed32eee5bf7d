//! CLI argument parsing and command dispatch

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::commands;

/// gitdep - Dependency management between git repositories
#[derive(Parser, Debug)]
#[command(name = "gitdep")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    pub color: String,

    /// Set log level (error, warn, info, debug, trace); RUST_LOG overrides it
    #[arg(long, global = true, value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Workspace root holding the root manifest. Defaults to the current
    /// directory.
    #[arg(
        short = 'C',
        long,
        global = true,
        value_name = "DIR",
        env = "GITDEP_WORKSPACE"
    )]
    pub workspace: Option<PathBuf>,

    /// Directory for discovery mirrors.
    ///
    /// Defaults to `cache_dir` from gitdep.yaml, then the system cache
    /// directory (e.g., `~/.cache/gitdep` on Linux).
    #[arg(long, global = true, value_name = "DIR", env = "GITDEP_CACHE")]
    pub cache_dir: Option<PathBuf>,

    /// Number of parallel workers.
    #[arg(short, long, global = true, value_name = "N", env = "GITDEP_JOBS")]
    pub jobs: Option<usize>,

    /// Repository that owns the root manifest. Dependencies back on it are
    /// reported as cycles. Defaults to the workspace's `origin` remote.
    #[arg(long, global = true, value_name = "URL")]
    pub root_url: Option<String>,

    /// How disagreeing refs are reconciled (overrides gitdep.yaml).
    #[arg(
        long,
        global = true,
        value_name = "POLICY",
        value_parser = ["ancestor", "strict"]
    )]
    pub conflict_policy: Option<String>,

    /// Fetch every repository from its remote even when the required refs
    /// are already in the cache.
    #[arg(long, global = true)]
    pub refresh: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve the dependency graph and synchronize the workspace
    Sync(commands::sync::SyncArgs),

    /// Resolve the dependency graph and print the resolved workspace manifest
    Resolve(commands::resolve::ResolveArgs),

    /// Display the resolved dependency tree
    Tree(commands::tree::TreeArgs),

    /// Validate a manifest file
    Validate(commands::validate::ValidateArgs),

    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.global.log_level);

        match self.command {
            Commands::Sync(args) => commands::sync::execute(args, &self.global),
            Commands::Resolve(args) => commands::resolve::execute(args, &self.global),
            Commands::Tree(args) => commands::tree::execute(args, &self.global),
            Commands::Validate(args) => commands::validate::execute(args, &self.global),
            Commands::Completions(args) => commands::completions::execute(args),
        }
    }
}

fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    // a second initialization only happens in tests
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .try_init();
}
