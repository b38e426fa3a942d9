use std::time::Duration;

/// Tool name, used for the config directory and tag prefix
pub const TOOL_NAME: &str = "mu";

/// Prefix applied to every tag written to a stack
pub const TAG_PREFIX: &str = "mu:";

/// Delay between polls of a long-running provider operation
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Config file looked up when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "mu.yml";

/// Per-user state directory under the home directory
pub const STATE_DIR_NAME: &str = ".mu";

/// Directory, relative to the state directory, where extensions are cached
pub const EXTENSIONS_DIR: &str = "extensions";

/// Owner of the vendor images searched by `find_latest_image_id`
pub const IMAGE_OWNER: &str = "amazon";

/// Image name patterns per cluster flavor
pub const ECS_IMAGE_PATTERN: &str = "amzn-ami-*-amazon-ecs-optimized";
pub const EC2_IMAGE_PATTERN: &str = "amzn-ami-hvm-*-x86_64-gp2";
pub const EKS_IMAGE_PATTERN: &str = "amazon-eks-node-*";

/// Version of this tool. Release builds may stamp `MU_VERSION` at compile time.
pub fn tool_version() -> &'static str {
    match option_env!("MU_VERSION") {
        Some(version) if !version.is_empty() => version,
        _ => env!("CARGO_PKG_VERSION"),
    }
}
