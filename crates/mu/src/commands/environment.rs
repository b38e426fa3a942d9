//! Environment command handlers

use std::time::Duration;

use clap::Subcommand;
use colored::Colorize;

use mu_core::Result;
use mu_core::executor::sequence;
use mu_core::workflows::{environment, logs};

use super::{context, parse_duration, view_logs};
use crate::GlobalArgs;
use crate::render::{self, Format};

/// Environment subcommands
#[derive(Subcommand, Debug)]
pub enum EnvironmentCommands {
    /// List environments
    #[command(alias = "ls")]
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: Format,
    },
    /// Show details about an environment
    Show {
        /// Environment name
        environment: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: Format,
    },
    /// Create or update environments
    #[command(alias = "up")]
    Upsert {
        /// Environment names
        #[arg(required = true)]
        environments: Vec<String>,
    },
    /// Terminate environments
    #[command(alias = "term")]
    Terminate {
        /// Environment names
        #[arg(required = true)]
        environments: Vec<String>,
    },
    /// Show environment logs
    Logs {
        /// Environment name
        environment: String,

        /// Keep polling for new events
        #[arg(short, long)]
        follow: bool,

        /// How far back to search (e.g. 30s, 5m, 1h)
        #[arg(short = 't', long, value_parser = parse_duration, default_value = "1m")]
        search_duration: Duration,

        /// Substring events must contain
        #[arg(default_value = "")]
        filter: String,
    },
}

pub async fn handle_environment_command(command: EnvironmentCommands, global: &GlobalArgs) -> Result<()> {
    let ctx = context(global).await?;

    match command {
        EnvironmentCommands::List { format } => {
            let summaries = environment::list(&ctx).await?;
            render::summaries("Environment", &summaries, format)
        }
        EnvironmentCommands::Show { environment, format } => {
            let view = environment::show(&ctx, &environment).await?;
            render::environment(&view, format)
        }
        EnvironmentCommands::Upsert { environments } => {
            let steps = environments
                .iter()
                .map(|name| environment::upserter(ctx.clone(), name))
                .collect();
            sequence(steps).execute().await?;
            println!("{}", "Environments upserted.".green());
            Ok(())
        }
        EnvironmentCommands::Terminate { environments } => {
            let steps = environments
                .iter()
                .map(|name| environment::terminator(ctx.clone(), name))
                .collect();
            sequence(steps).execute().await?;
            println!("{}", "Environments terminated.".green());
            Ok(())
        }
        EnvironmentCommands::Logs {
            environment,
            follow,
            search_duration,
            filter,
        } => {
            let groups = logs::environment_groups(&ctx, &environment);
            view_logs(ctx, groups, search_duration, follow, &filter).await
        }
    }
}
