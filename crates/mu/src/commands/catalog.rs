//! Service catalog command handlers

use clap::Subcommand;
use colored::Colorize;

use mu_core::Result;
use mu_core::workflows::catalog;

use super::context;
use crate::GlobalArgs;

/// Catalog subcommands
#[derive(Subcommand, Debug)]
pub enum CatalogCommands {
    /// Publish the portfolio and pipeline products of the config
    #[command(alias = "up")]
    Upsert,
    /// Remove provisioned products, products and the portfolio
    #[command(alias = "term")]
    Terminate,
}

pub async fn handle_catalog_command(command: CatalogCommands, global: &GlobalArgs) -> Result<()> {
    let ctx = context(global).await?;

    match command {
        CatalogCommands::Upsert => {
            catalog::upserter(ctx).execute().await?;
            println!("{}", "Catalog upserted.".green());
        }
        CatalogCommands::Terminate => {
            catalog::terminator(ctx).execute().await?;
            println!("{}", "Catalog terminated.".green());
        }
    }
    Ok(())
}
