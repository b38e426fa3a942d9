//! Commands module
//!
//! Defines the CLI subcommands and wires them to the `mu-core` workflows.

mod catalog;
mod database;
mod environment;
mod init;
mod pipeline;
mod purge;
mod service;

pub use catalog::CatalogCommands;
pub use database::DatabaseCommands;
pub use environment::EnvironmentCommands;
pub use init::InitArgs;
pub use pipeline::PipelineCommands;
pub use purge::PurgeArgs;
pub use service::ServiceCommands;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Subcommand;
use log::{debug, warn};

use mu_core::config::loader::{discover_repo, load_config_str};
use mu_core::kernel::ProviderApis;
use mu_core::kernel::context::state_dir;
use mu_core::local::{LocalCloud, STATE_FILE_ENV};
use mu_core::workflows::init::validate_file;
use mu_core::workflows::logs::{self, LineSink};
use mu_core::{Config, Context, ContextBuilder, Result};

use crate::GlobalArgs;

const STATE_FILE: &str = "state.json";

/// Top-level CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a starter config for the repository in the current directory
    Init(InitArgs),
    /// Validate the config file
    Validate,
    /// Options for managing environments
    #[command(alias = "env")]
    Environment {
        #[command(subcommand)]
        command: EnvironmentCommands,
    },
    /// Options for managing services
    #[command(alias = "svc")]
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },
    /// Options for managing databases
    #[command(alias = "db")]
    Database {
        #[command(subcommand)]
        command: DatabaseCommands,
    },
    /// Options for managing pipelines
    #[command(alias = "pl")]
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Options for managing the service catalog
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
    /// Remove every stack in the namespace
    Purge(PurgeArgs),
}

pub async fn handle_command(command: Commands, global: &GlobalArgs) -> Result<()> {
    match command {
        Commands::Init(args) => init::handle_init(args),
        Commands::Validate => init::handle_validate(global),
        Commands::Environment { command } => environment::handle_environment_command(command, global).await,
        Commands::Service { command } => service::handle_service_command(command, global).await,
        Commands::Database { command } => database::handle_database_command(command, global).await,
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, global).await,
        Commands::Catalog { command } => catalog::handle_catalog_command(command, global).await,
        Commands::Purge(args) => purge::handle_purge(args, global).await,
    }
}

/// Load the config named by `--config`. A missing default `mu.yml` yields an
/// empty config for the current directory so listing commands still work.
pub fn load(global: &GlobalArgs) -> Result<Config> {
    let path = &global.config;
    if !path.is_file() && path.as_os_str() == mu_core::kernel::constants::DEFAULT_CONFIG_FILE {
        warn!("No config file found at '{}', using defaults", path.display());
        let mut config = load_config_str("", path)?;
        let basedir = env::current_dir().map_err(|e| mu_core::Error::io(e, "resolve", "."))?;
        config.repo = discover_repo(&basedir);
        config.basedir = basedir;
        return Ok(config);
    }
    validate_file(path)
}

fn state_file() -> PathBuf {
    match env::var(STATE_FILE_ENV) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => state_dir().join(STATE_FILE),
    }
}

/// Build the context every workflow runs against.
pub async fn context(global: &GlobalArgs) -> Result<Arc<Context>> {
    let config = load(global)?;

    for (flag, value) in [
        ("region", &global.region),
        ("assume-role", &global.assume_role),
        ("profile", &global.profile),
    ] {
        if let Some(value) = value {
            debug!("Using {flag} '{value}'");
        }
    }

    let path = state_file();
    debug!("Using local cloud state at '{}'", path.display());
    let cloud = Arc::new(LocalCloud::open(path)?);

    let mut builder = ContextBuilder::new(config)
        .namespace(global.namespace.as_deref().unwrap_or_default())
        .dryrun(global.dryrun)
        .skip_version_check(global.skip_version_check)
        .disable_iam(global.disable_iam)
        .proxy(global.proxy.as_deref().unwrap_or_default());
    if let Some(output) = &global.dryrun_output {
        builder = builder.dryrun_output(output);
    }
    Ok(Arc::new(builder.build(ProviderApis::local(cloud)).await?))
}

/// Parse `30s`, `5m`, `2h` or a bare number of seconds.
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    let value = value.trim();
    let (digits, unit) = value
        .find(|c: char| !c.is_ascii_digit())
        .map(|i| value.split_at(i))
        .unwrap_or((value, "s"));
    let amount: u64 = digits.parse().map_err(|_| format!("invalid duration '{value}'"))?;
    let seconds = match unit {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3600,
        _ => return Err(format!("invalid duration unit in '{value}', expected s, m or h")),
    };
    Ok(Duration::from_secs(seconds))
}

/// Print log lines to stdout as they arrive.
pub fn stdout_sink() -> LineSink {
    Arc::new(|line: &str| println!("{line}"))
}

/// Run the log viewer over `groups`.
pub async fn view_logs(
    ctx: Arc<Context>,
    groups: Vec<String>,
    search_duration: Duration,
    follow: bool,
    filter: &str,
) -> Result<()> {
    logs::viewer(ctx, groups, search_duration, follow, filter, stdout_sink())
        .execute()
        .await
}

/// Ask a yes/no question on the terminal; anything but `y`/`yes` is no.
pub fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush().map_err(|e| mu_core::Error::io(e, "write", "stdout"))?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .map_err(|e| mu_core::Error::io(e, "read", "stdin"))?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Read a line from the terminal after showing `prompt`.
pub fn prompt(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush().map_err(|e| mu_core::Error::io(e, "write", "stdout"))?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .map_err(|e| mu_core::Error::io(e, "read", "stdin"))?;
    Ok(answer.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("90"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("m").is_err());
    }
}
