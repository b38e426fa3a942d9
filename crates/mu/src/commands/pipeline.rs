//! Pipeline command handlers

use std::env;
use std::time::Duration;

use clap::Subcommand;
use colored::Colorize;
use log::warn;

use mu_core::Result;
use mu_core::workflows::{logs, pipeline};

use super::{context, parse_duration, prompt, view_logs};
use crate::GlobalArgs;
use crate::render::{self, Format};

const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Pipeline subcommands
#[derive(Subcommand, Debug)]
pub enum PipelineCommands {
    /// List pipelines
    #[command(alias = "ls")]
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: Format,
    },
    /// Show details about a pipeline
    Show {
        /// Service name, defaults to the service in the config
        #[arg(default_value = "")]
        service: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: Format,
    },
    /// Show build logs of a pipeline
    Logs {
        /// Service name, defaults to the service in the config
        #[arg(short = 'S', long, default_value = "")]
        service: String,

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
    /// Create or update the pipeline of the service
    #[command(alias = "up")]
    Upsert {
        /// GitHub token; read from GITHUB_TOKEN or prompted for when needed
        #[arg(short = 'T', long)]
        token: Option<String>,
    },
    /// Terminate the pipeline of a service
    #[command(alias = "term")]
    Terminate {
        /// Service name, defaults to the service in the config
        #[arg(default_value = "")]
        service: String,
    },
}

/// Token for a GitHub source: the flag, else the environment, else a prompt on
/// first creation. An empty token keeps the one already stored on update.
fn token_provider(flag: Option<String>) -> impl FnOnce(bool) -> String + Send + 'static {
    move |is_new| {
        if let Some(token) = flag.filter(|t| !t.is_empty()) {
            return token;
        }
        if let Ok(token) = env::var(TOKEN_ENV) {
            if !token.is_empty() {
                return token;
            }
        }
        if !is_new {
            return String::new();
        }
        prompt("GitHub token: ").unwrap_or_else(|err| {
            warn!("Unable to read token: {err}");
            String::new()
        })
    }
}

pub async fn handle_pipeline_command(command: PipelineCommands, global: &GlobalArgs) -> Result<()> {
    let ctx = context(global).await?;

    match command {
        PipelineCommands::List { format } => {
            let summaries = pipeline::list(&ctx).await?;
            render::summaries("Service", &summaries, format)
        }
        PipelineCommands::Show { service, format } => {
            let view = pipeline::show(&ctx, &service).await?;
            render::pipeline(&view, format)
        }
        PipelineCommands::Logs {
            service,
            follow,
            search_duration,
            filter,
        } => {
            let groups = logs::pipeline_groups(&ctx, &service)?;
            view_logs(ctx, groups, search_duration, follow, &filter).await
        }
        PipelineCommands::Upsert { token } => {
            pipeline::upserter(ctx, token_provider(token)).execute().await?;
            println!("{}", "Pipeline upserted.".green());
            Ok(())
        }
        PipelineCommands::Terminate { service } => pipeline::terminator(ctx, &service).execute().await,
    }
}
