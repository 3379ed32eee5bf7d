//! # Resolve Command Implementation
//!
//! Runs discovery, resolution, cycle detection and layout, then prints the
//! resolved workspace manifest. Nothing in the workspace is checked out;
//! with `--write` the lockfile is updated.

use anyhow::Result;
use clap::{Args, ValueEnum};

use gitdep::lockfile::Lockfile;

use super::Context;
use crate::cli::GlobalArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

/// Resolve the dependency graph and print the resolved workspace manifest
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Output format.
    #[arg(short, long, value_enum, default_value = "yaml")]
    pub format: OutputFormat,

    /// Also write the lockfile.
    #[arg(long)]
    pub write: bool,
}

/// Execute the `resolve` command.
pub fn execute(args: ResolveArgs, global: &GlobalArgs) -> Result<()> {
    let context = Context::new(global)?;
    let pool = context.pool()?;
    let plan = context.plan(&pool)?;

    let lockfile = Lockfile::from_resolution(&plan.resolution);
    let rendered = match args.format {
        OutputFormat::Yaml => lockfile.to_yaml()?,
        OutputFormat::Json => lockfile.to_json()?,
    };
    print!("{}", rendered);
    if !rendered.ends_with('\n') {
        println!();
    }

    if args.write {
        let path = context.lockfile_path();
        if lockfile.save(&path)? {
            eprintln!("wrote {}", path.display());
        }
    }
    Ok(())
}
