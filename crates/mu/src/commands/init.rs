//! Init and validate command handlers

use std::env;
use std::path::PathBuf;

use clap::Args;
use colored::Colorize;

use mu_core::workflows::init::{InitOptions, initialize, validate_file};
use mu_core::{Error, Result};

use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Also define `dev` and `production` environments
    #[arg(short, long)]
    env: bool,

    /// Port the service listens on
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Overwrite existing files
    #[arg(long)]
    force: bool,

    /// Repository directory, defaults to the current directory
    #[arg(long)]
    dir: Option<PathBuf>,
}

pub fn handle_init(args: InitArgs) -> Result<()> {
    let basedir = match args.dir {
        Some(dir) => dir,
        None => env::current_dir().map_err(|e| Error::io(e, "resolve", "."))?,
    };
    let options = InitOptions {
        create_environments: args.env,
        port: args.port,
        force: args.force,
    };
    for path in initialize(&basedir, &options)? {
        println!("{} {}", "Wrote".green(), path.display());
    }
    Ok(())
}

pub fn handle_validate(global: &GlobalArgs) -> Result<()> {
    let config = validate_file(&global.config)?;
    println!(
        "{} {} (namespace '{}')",
        "Valid:".green().bold(),
        global.config.display(),
        config.namespace
    );
    Ok(())
}
