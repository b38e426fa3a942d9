//! Service command handlers

use std::time::Duration;

use clap::Subcommand;
use colored::Colorize;

use mu_core::Result;
use mu_core::workflows::{logs, service};

use super::{context, load, parse_duration, view_logs};
use crate::GlobalArgs;
use crate::render::{self, Format};

/// Service subcommands
#[derive(Subcommand, Debug)]
pub enum ServiceCommands {
    /// Show details about a service
    Show {
        /// Service name, defaults to the service in the config
        #[arg(default_value = "")]
        service: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: Format,
    },
    /// Build and push the service artifact
    Push {
        /// Tag for the image or archive, defaults to the git revision
        #[arg(short, long, default_value = "")]
        tag: String,
    },
    /// Deploy the service to an environment
    Deploy {
        /// Environment name
        environment: String,

        /// Image tag to deploy, defaults to the git revision
        #[arg(short, long, default_value = "")]
        tag: String,
    },
    /// Remove the service from an environment
    Undeploy {
        /// Environment name
        environment: String,

        /// Service name, defaults to the service in the config
        #[arg(default_value = "")]
        service: String,
    },
    /// Show service logs
    Logs {
        /// Environment name
        environment: String,

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
    /// Run a command in a new task of the service
    Exec {
        /// Environment name
        environment: String,

        /// Service name, defaults to the service in the config
        #[arg(short = 'S', long, default_value = "")]
        service: String,

        /// Command to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Restart the running tasks of the service
    Restart {
        /// Environment name
        environment: String,

        /// Service name, defaults to the service in the config
        #[arg(default_value = "")]
        service: String,

        /// Tasks stopped at a time
        #[arg(short, long, default_value_t = 1)]
        batch_size: usize,
    },
    /// Set environment variables of the service in the config file
    Setenv {
        /// Environment name
        environment: String,

        /// KEY=VALUE settings
        #[arg(required = true)]
        settings: Vec<String>,
    },
}

pub async fn handle_service_command(command: ServiceCommands, global: &GlobalArgs) -> Result<()> {
    // setenv edits the file and needs no provider
    if let ServiceCommands::Setenv { environment, settings } = &command {
        load(global)?;
        service::setenv(&global.config, environment, settings)?;
        println!("{} {}", "Updated".green(), global.config.display());
        return Ok(());
    }

    let ctx = context(global).await?;
    match command {
        ServiceCommands::Show { service, format } => {
            let view = service::show(&ctx, &service).await?;
            render::service(&view, format)
        }
        ServiceCommands::Push { tag } => service::pusher(ctx, &tag).execute().await,
        ServiceCommands::Deploy { environment, tag } => {
            service::deployer(ctx, &environment, &tag).execute().await?;
            println!("{} {}", "Deployed to".green(), environment.cyan());
            Ok(())
        }
        ServiceCommands::Undeploy { environment, service } => {
            service::undeployer(ctx, &environment, &service).execute().await
        }
        ServiceCommands::Logs {
            environment,
            service,
            follow,
            search_duration,
            filter,
        } => {
            let groups = logs::service_groups(&ctx, &environment, &service)?;
            view_logs(ctx, groups, search_duration, follow, &filter).await
        }
        ServiceCommands::Exec {
            environment,
            service,
            command,
        } => service::executor(ctx, &environment, &service, command).execute().await,
        ServiceCommands::Restart {
            environment,
            service,
            batch_size,
        } => {
            service::restarter(ctx, &environment, &service, batch_size.max(1))
                .execute()
                .await
        }
        // handled above
        ServiceCommands::Setenv { .. } => Ok(()),
    }
}
