//! `tomei apply`: load manifests, plan, execute.

use super::Context;
use crate::engine::{CancelToken, Engine, Event, EventHandler};
use crate::manifest::{Loader, YamlParser};
use crate::planner::UpdateFlags;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args)]
pub struct ApplyArgs {
    /// Manifest files or directories (default: the config root).
    pub paths: Vec<PathBuf>,

    /// Worker pool size (1-20, default 5).
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Reinstall tools with `latest`/alias versions.
    #[arg(long)]
    pub update_tools: bool,

    /// Reinstall runtimes with `latest`/alias versions.
    #[arg(long)]
    pub update_runtimes: bool,

    /// Reinstall everything with `latest`/alias versions.
    #[arg(long)]
    pub update_all: bool,

    /// Wait up to this many seconds for the state lock instead of failing.
    #[arg(long)]
    pub wait_lock: Option<u64>,
}

pub async fn run(ctx: &Context, args: &ApplyArgs, verbose: bool) -> Result<()> {
    let loader = Loader::new(Arc::new(YamlParser));
    let resources = loader.load(&super::manifest_paths(ctx, &args.paths)?)?;

    let mut engine = Engine::new(&ctx.data_dir, &ctx.bin_dir);
    let parallel = args
        .parallel
        .or(ctx.config.parallel)
        .unwrap_or(crate::engine::DEFAULT_PARALLEL);
    engine.set_parallel(parallel);
    engine.set_event_handler(event_printer(verbose));
    if let Some(seconds) = args.wait_lock {
        engine.set_lock_timeout(Some(Duration::from_secs(seconds)));
    }

    let cancel = CancelToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "interrupt received, cancelling...".yellow());
            canceller.cancel();
        }
    });

    let flags = UpdateFlags {
        tools: args.update_tools,
        runtimes: args.update_runtimes,
        all: args.update_all,
    };
    let report = engine.apply(cancel, &resources, flags).await?;

    let summary = report.summary;
    println!(
        "{} {} installed, {} upgraded, {} reinstalled, {} removed",
        "apply complete:".green().bold(),
        summary.install,
        summary.upgrade,
        summary.reinstall,
        summary.remove
    );
    Ok(())
}

/// A plain line-per-event renderer. Progress is intentionally quiet unless
/// verbose; richer terminal UI lives outside the engine contract.
fn event_printer(verbose: bool) -> EventHandler {
    Arc::new(move |event: &Event| match event {
        Event::Start { id, action, method, version } => {
            let version = if version.is_empty() { "latest".to_string() } else { version.clone() };
            println!("{} {action} {id} {version} ({method})", "→".blue());
        }
        Event::Complete { id } => println!("{} {id}", "✓".green()),
        Event::Error { id, message } => eprintln!("{} {id}: {message}", "✗".red()),
        Event::Output { id, line } => {
            if verbose {
                println!("  {} {line}", format!("[{id}]").dimmed());
            }
        }
        Event::Progress { .. } => {}
    })
}
