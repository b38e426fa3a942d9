//! # Mu Core Kernel
//!
//! The `kernel` module holds what every other part of `mu-core` leans on: the
//! error model, the process-wide constants, and the [`Context`] that wires the
//! managers together for one invocation.
//!
//! ## Key Responsibilities & Components:
//!
//! - **Context Assembly**: [`ContextBuilder`](context::ContextBuilder) turns a loaded
//!   [`Config`](crate::config::Config) plus a set of [`ProviderApis`](context::ProviderApis)
//!   into a [`Context`](context::Context) holding the stack, roleset, parameter, artifact
//!   and runtime managers, with dryrun and version-check options applied once.
//! - **Core Constants**: Tool name, tag prefix, polling interval and default paths via
//!   the `constants` submodule.
//! - **Error Handling**: Defines the crate-wide [`Error`](error::Error) enum and the
//!   `Result` alias in the `error` submodule.
pub mod constants;
pub mod context;
pub mod error;

pub use context::{Context, ContextBuilder, ProviderApis};
pub use error::{Error, Result};

#[cfg(test)]
mod tests;
