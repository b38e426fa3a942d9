pub mod artifact;
pub mod config;
pub mod executor;
pub mod extensions;
pub mod kernel;
pub mod local;
pub mod param;
pub mod provider;
pub mod roleset;
pub mod stack;
pub mod templates;
pub mod workflows;

// Re-export the types the binary and integrations reach for most often
pub use config::Config;
pub use executor::Executor;
pub use kernel::error::{Error, Result};
pub use kernel::{Context, ContextBuilder};
pub use stack::{Stack, StackManager, StackType};
