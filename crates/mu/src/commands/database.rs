//! Database command handlers

use clap::Subcommand;
use colored::Colorize;

use mu_core::Result;
use mu_core::workflows::database;

use super::{context, prompt};
use crate::GlobalArgs;
use crate::render::{self, Format};

/// Database subcommands
#[derive(Subcommand, Debug)]
pub enum DatabaseCommands {
    /// List databases
    #[command(alias = "ls")]
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: Format,
    },
    /// Create or update the database of the service
    #[command(alias = "up")]
    Upsert {
        /// Environment name
        environment: String,
    },
    /// Terminate the database of a service
    #[command(alias = "term")]
    Terminate {
        /// Environment name
        environment: String,

        /// Service name, defaults to the service in the config
        #[arg(default_value = "")]
        service: String,
    },
    /// Print the master password of a database
    GetPassword {
        /// Environment name
        environment: String,

        /// Service name, defaults to the service in the config
        #[arg(default_value = "")]
        service: String,
    },
    /// Change the master password of a database
    SetPassword {
        /// Environment name
        environment: String,

        /// Service name, defaults to the service in the config
        #[arg(default_value = "")]
        service: String,

        /// New password, prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },
}

pub async fn handle_database_command(command: DatabaseCommands, global: &GlobalArgs) -> Result<()> {
    let ctx = context(global).await?;

    match command {
        DatabaseCommands::List { format } => {
            let summaries = database::list(&ctx).await?;
            render::summaries("Service", &summaries, format)
        }
        DatabaseCommands::Upsert { environment } => database::upserter(ctx, &environment).execute().await,
        DatabaseCommands::Terminate { environment, service } => {
            database::terminator(ctx, &environment, &service).execute().await
        }
        DatabaseCommands::GetPassword { environment, service } => {
            let password = database::get_password(&ctx, &environment, &service).await?;
            println!("{password}");
            Ok(())
        }
        DatabaseCommands::SetPassword {
            environment,
            service,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => prompt("New database password: ")?,
            };
            if password.is_empty() {
                return Err("database password must not be empty".into());
            }
            database::set_password(&ctx, &environment, &service, &password).await?;
            println!("{}", "Password updated.".green());
            Ok(())
        }
    }
}
