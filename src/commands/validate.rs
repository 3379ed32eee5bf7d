//! # Validate Command Implementation
//!
//! Parses one manifest file and reports whether it is well formed: every
//! record decomposes into repository, ref and optional path, every
//! repository spec canonicalizes, and no repository is declared twice.
//! Nothing is fetched.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use gitdep::config::Settings;
use gitdep::identity::Requester;
use gitdep::manifest;
use gitdep::output::{emoji, OutputConfig};

use crate::cli::GlobalArgs;

/// Validate a manifest file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Manifest to validate. Defaults to the workspace's root manifest.
    #[arg(short, long, value_name = "FILE")]
    pub manifest: Option<PathBuf>,
}

/// Execute the `validate` command.
pub fn execute(args: ValidateArgs, global: &GlobalArgs) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(&global.color);
    let path = match args.manifest {
        Some(path) => path,
        None => {
            let root = global
                .workspace
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            let settings = Settings::load(&root)?;
            root.join(settings.manifest)
        }
    };

    let node = manifest::from_file(&path, &Requester::Root)?;
    println!(
        "{} {}: {} dependencies",
        emoji(&out, "✅", "[OK]"),
        path.display(),
        node.dependencies.len()
    );
    for dependency in &node.dependencies {
        let location = dependency
            .path
            .clone()
            .unwrap_or_else(|| dependency.identity.default_checkout_path());
        println!(
            "   {} @ {} -> {}",
            dependency.identity,
            dependency.r#ref,
            location.display()
        );
    }
    Ok(())
}
