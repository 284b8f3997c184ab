//! `tomei plan`: show the actions an apply would take.

use super::Context;
use crate::engine::Engine;
use crate::manifest::{Loader, YamlParser};
use crate::planner::{Action, UpdateFlags};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args)]
pub struct PlanArgs {
    /// Manifest files or directories (default: the config root).
    pub paths: Vec<PathBuf>,

    #[arg(long)]
    pub update_tools: bool,

    #[arg(long)]
    pub update_runtimes: bool,

    #[arg(long)]
    pub update_all: bool,

    /// Emit the plan as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let loader = Loader::new(Arc::new(YamlParser));
    let resources = loader.load(&super::manifest_paths(ctx, &args.paths)?)?;

    let engine = Engine::new(&ctx.data_dir, &ctx.bin_dir);
    let flags = UpdateFlags {
        tools: args.update_tools,
        runtimes: args.update_runtimes,
        all: args.update_all,
    };
    let plan = engine.plan(&resources, flags)?;

    if args.json {
        let actions: Vec<serde_json::Value> = plan
            .actions
            .iter()
            .map(|(id, action)| {
                serde_json::json!({ "resource": id.qualified(), "action": action })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "actions": actions,
                "summary": plan.summary,
            }))?
        );
        return Ok(());
    }

    if plan.is_noop() {
        println!("{}", "nothing to do".green());
        return Ok(());
    }

    for (id, action) in &plan.actions {
        let marker = match action {
            Action::Install => "+".green(),
            Action::Upgrade => "~".yellow(),
            Action::Reinstall => "!".yellow(),
            Action::Remove => "-".red(),
            Action::None => continue,
        };
        println!("{marker} {action} {id}");
    }
    let summary = plan.summary;
    println!(
        "\n{} {} to install, {} to upgrade, {} to reinstall, {} to remove",
        "plan:".bold(),
        summary.install,
        summary.upgrade,
        summary.reinstall,
        summary.remove
    );
    Ok(())
}
