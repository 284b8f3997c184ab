//! Command-line interface.
//!
//! The CLI is a thin shell: it resolves directories and flags, constructs
//! the engine, and renders events and errors. All reconciliation logic
//! lives in the library modules.

mod apply;
mod diff;
mod plan;

use crate::config::Config;
use crate::utils::paths;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tomei", version, about = "Declarative developer environment manager")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config root (default: ~/.config/tomei).
    #[arg(long, global = true, env = "TOMEI_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Data root (default: ~/.local/share/tomei).
    #[arg(long, global = true, env = "TOMEI_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the machine against the declared manifests.
    Apply(apply::ApplyArgs),
    /// Show what an apply would do, without executing.
    Plan(plan::PlanArgs),
    /// Show what the last apply changed.
    Diff(diff::DiffArgs),
}

/// Directories and file-config shared by every subcommand.
pub struct Context {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub config: Config,
}

impl Cli {
    fn context(&self) -> Result<Context> {
        let config_dir = match &self.config_dir {
            Some(dir) => dir.clone(),
            None => paths::default_config_dir()?,
        };
        let config = Config::load(&config_dir)?;

        let data_dir = if let Some(dir) = &self.data_dir {
            dir.clone()
        } else if let Some(dir) = &config.data_dir {
            paths::expand(dir)?
        } else {
            paths::default_data_dir()?
        };
        let bin_dir = match &config.bin_dir {
            Some(dir) => paths::expand(dir)?,
            None => paths::default_bin_dir()?,
        };

        Ok(Context { config_dir, data_dir, bin_dir, config })
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let ctx = cli.context()?;
    match &cli.command {
        Commands::Apply(args) => apply::run(&ctx, args, cli.verbose).await,
        Commands::Plan(args) => plan::run(&ctx, args),
        Commands::Diff(args) => diff::run(&ctx, args),
    }
}

/// Manifest paths for a command: explicit arguments, else the configured
/// manifest directory, else the config root itself.
pub(crate) fn manifest_paths(ctx: &Context, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if !paths.is_empty() {
        return Ok(paths.to_vec());
    }
    if let Some(dir) = &ctx.config.manifests {
        return Ok(vec![paths::expand(dir)?]);
    }
    Ok(vec![ctx.config_dir.clone()])
}
