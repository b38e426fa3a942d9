mod commands;
mod logging;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser};
use log::error;

use commands::{Commands, handle_command};

/// Mu: infrastructure for microservices
#[derive(Parser, Debug)]
#[command(name = "mu", author, version, about, long_about = None, disable_version_flag = true)]
struct Cli {
    /// Print version
    #[arg(long, action = ArgAction::Version)]
    version: Option<bool>,

    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags accepted before or after any subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Path to the config file
    #[arg(short = 'c', long, global = true, default_value = "mu.yml")]
    pub config: PathBuf,

    /// Cloud region
    #[arg(short = 'r', long, global = true)]
    pub region: Option<String>,

    /// Role to assume before making calls
    #[arg(short = 'a', long, global = true)]
    pub assume_role: Option<String>,

    /// Credentials profile
    #[arg(short = 'p', long, global = true)]
    pub profile: Option<String>,

    /// Namespace to use for stack names, overriding the config
    #[arg(short = 'n', long, global = true)]
    pub namespace: Option<String>,

    /// Only log warnings and errors
    #[arg(short = 's', long, global = true)]
    pub silent: bool,

    /// Log debug output
    #[arg(short = 'V', long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Write templates and parameters instead of provisioning
    #[arg(short = 'd', long, global = true)]
    pub dryrun: bool,

    /// Directory dryrun output is written to
    #[arg(short = 'O', long, global = true)]
    pub dryrun_output: Option<PathBuf>,

    /// Leave IAM roles alone
    #[arg(short = 'I', long, global = true)]
    pub disable_iam: bool,

    /// Allow upserting stacks created by an incompatible major version
    #[arg(short = 'F', long, global = true)]
    pub skip_version_check: bool,

    /// Proxy for outbound HTTP calls
    #[arg(short = 'P', long, global = true)]
    pub proxy: Option<String>,
}

impl GlobalArgs {
    /// 0 silent, 1 default, 2 verbose.
    pub fn verbosity(&self) -> u8 {
        match (self.silent, self.verbose) {
            (_, true) => 2,
            (true, false) => 0,
            (false, false) => 1,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = logging::init(cli.global.verbosity()) {
        eprintln!("Unable to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Unable to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(handle_command(cli.command, &cli.global)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
