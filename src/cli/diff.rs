//! `tomei diff`: what the last apply changed, from the state backup.

use super::Context;
use crate::diff::StateDiff;
use crate::state::StateStore;
use anyhow::Result;
use clap::Args;

#[derive(Args)]
pub struct DiffArgs {
    /// Emit the diff as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(ctx: &Context, args: &DiffArgs) -> Result<()> {
    let store = StateStore::new(&ctx.data_dir);
    let current = store.load()?;
    let Some(backup) = store.load_backup()? else {
        println!("No backup found");
        return Ok(());
    };

    let diff = StateDiff::between(&backup, &current);
    if args.json {
        println!("{}", diff.render_json()?);
    } else {
        print!("{}", diff.render_human());
        if diff.is_empty() {
            println!();
        }
    }
    Ok(())
}
