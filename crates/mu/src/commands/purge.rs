//! Purge command handler

use clap::Args;
use colored::Colorize;
use log::info;

use mu_core::Result;
use mu_core::workflows::purge;

use super::{confirm, context};
use crate::GlobalArgs;
use crate::render::{self, Format};

#[derive(Args, Debug)]
pub struct PurgeArgs {
    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    yes: bool,
}

pub async fn handle_purge(args: PurgeArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = context(global).await?;

    let plan = purge::plan(&ctx).await?;
    if plan.is_empty() {
        info!("Nothing to purge in namespace '{}'", ctx.namespace());
        return Ok(());
    }

    render::summaries("Type", &plan, Format::Table)?;
    if !args.yes {
        let question = format!(
            "Delete {} stacks from namespace '{}'?",
            plan.len(),
            ctx.namespace()
        );
        if !confirm(&question)? {
            println!("{}", "Purge cancelled.".yellow());
            return Ok(());
        }
    }

    purge::purger(ctx).execute().await?;
    println!("{}", "Namespace purged.".green());
    Ok(())
}
