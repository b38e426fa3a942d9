//! Starter files for a new repository, and config validation.
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde_json::json;

use crate::config::loader::discover_repo;
use crate::config::validate::validate;
use crate::config::{Config, load_config};
use crate::kernel::error::{Error, Result};
use crate::templates;
use crate::workflows::WorkflowError;

pub const CONFIG_FILE: &str = "mu.yml";
pub const BUILDSPEC_FILE: &str = "buildspec.yml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOptions {
    /// Add `dev` and `production` environments.
    pub create_environments: bool,
    pub port: u16,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            create_environments: false,
            port: 8080,
            force: false,
        }
    }
}

/// Write `mu.yml` and `buildspec.yml` into `basedir` for the git repository
/// found there. Existing files are only replaced with `force`.
pub fn initialize(basedir: &Path, options: &InitOptions) -> Result<Vec<PathBuf>> {
    let repo = discover_repo(basedir);
    if repo.slug.is_empty() {
        return Err(WorkflowError::RepositoryUnknown {
            basedir: basedir.to_path_buf(),
        }
        .into());
    }

    let config_path = basedir.join(CONFIG_FILE);
    let buildspec_path = basedir.join(BUILDSPEC_FILE);
    if !options.force {
        for path in [&config_path, &buildspec_path] {
            debug!("Checking for existing file at '{}'", path.display());
            if path.exists() {
                return Err(WorkflowError::ConfigExists { path: path.clone() }.into());
            }
        }
    }

    let mut document = json!({
        "service": {
            "name": repo.name,
            "port": options.port,
            "pathPatterns": ["/*"],
            "pipeline": {
                "source": {
                    "provider": repo.provider,
                    "repo": repo.slug,
                },
            },
        },
    });
    if options.create_environments {
        document["environments"] = json!([{ "name": "dev" }, { "name": "production" }]);
    }
    let body = serde_yaml::to_string(&document).map_err(|e| Error::serialization("yaml", e))?;

    info!("Writing config to '{}'", config_path.display());
    fs::write(&config_path, body).map_err(|e| Error::io(e, "write", &config_path))?;

    info!("Writing buildspec to '{}'", buildspec_path.display());
    let buildspec = templates::asset(templates::BUILDSPEC)?;
    fs::write(&buildspec_path, buildspec).map_err(|e| Error::io(e, "write", &buildspec_path))?;

    Ok(vec![config_path, buildspec_path])
}

/// Load the config at `path` and check every field, failing on the first violation.
pub fn validate_file(path: &Path) -> Result<Config> {
    let config = load_config(path)?;
    validate(&config)?;
    Ok(config)
}
