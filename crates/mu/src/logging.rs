//! Log output for the `mu` binary.
//!
//! `mu-core` logs through the `log` facade; records are bridged into a
//! `tracing` fmt subscriber. Warnings and errors go to stderr, everything else
//! to stdout. `RUST_LOG` takes precedence over the verbosity flags.
use std::io::{self, IsTerminal};

use tracing::Level;
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Filter directive for a verbosity of 0 (silent), 1 (default) or 2 (verbose).
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug,hyper=info,reqwest=info",
    }
}

pub fn init(verbosity: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let writer = io::stderr.with_max_level(Level::WARN).or_else(io::stdout);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(io::stdout().is_terminal() && io::stderr().is_terminal())
        .with_target(verbosity > 1)
        .with_level(verbosity > 1)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_follows_verbosity() {
        assert_eq!(default_directive(0), "warn");
        assert_eq!(default_directive(1), "info");
        assert!(default_directive(2).starts_with("debug"));
    }
}
