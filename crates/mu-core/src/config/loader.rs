//! Loading `mu.yml`: environment substitution, parsing and repository discovery.
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use regex::{Captures, Regex};

use crate::config::error::ConfigError;
use crate::config::git;
use crate::config::{Config, Repo};
use crate::kernel::error::{Error, Result};

const ENV_PATTERN: &str = r"\$\{env:([a-zA-Z0-9_]*)\}";

/// Namespace used when the config does not name one.
pub const DEFAULT_NAMESPACE: &str = "mu";

/// Replace every `${env:NAME}` with the value of `NAME`, or nothing when unset.
pub fn substitute_env(input: &str) -> Result<String> {
    let regex = Regex::new(ENV_PATTERN).map_err(|e| Error::parse("regex", ENV_PATTERN, e))?;
    Ok(regex
        .replace_all(input, |caps: &Captures| env::var(&caps[1]).unwrap_or_default())
        .into_owned())
}

/// Parse a config document. `path` is only used in error messages.
pub fn load_config_str(body: &str, path: &Path) -> Result<Config> {
    let body = substitute_env(body)?;
    let mut config: Config = if body.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(&body).map_err(|e| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    };
    if config.namespace.is_empty() {
        config.namespace = DEFAULT_NAMESPACE.to_string();
    }
    Ok(config)
}

/// Load the config file at `path` and discover the repository around it.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.is_file() {
        return Err(ConfigError::NotFound { path: path.to_path_buf() }.into());
    }
    let abs_path = std::path::absolute(path).map_err(|e| Error::io(e, "resolve", path))?;
    let basedir = abs_path.parent().map(Path::to_path_buf).unwrap_or_default();
    debug!("Setting basedir={}", basedir.display());

    let body = fs::read_to_string(&abs_path).map_err(|e| Error::io(e, "read", &abs_path))?;
    let mut config = load_config_str(&body, &abs_path)?;
    config.repo = discover_repo(&basedir);
    config.rel_mu_file = relative_mu_file(&abs_path)?;
    config.basedir = basedir;
    Ok(config)
}

/// Repository metadata for `basedir`. Without a `.git` directory the name is the
/// directory name and the revision a timestamp.
pub fn discover_repo(basedir: &Path) -> Repo {
    let mut repo = Repo {
        name: basedir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        revision: chrono::Local::now().format("%Y%m%d%H%M%S").to_string(),
        ..Default::default()
    };

    let Some(git_dir) = git::find_git_directory(basedir) else {
        warn!("Unable to determine git revision: no git repository above '{}'", basedir.display());
        return repo;
    };

    match git::find_git_revision(&git_dir) {
        Ok(revision) => repo.revision = revision,
        Err(err) => warn!("Unable to determine git revision: {err}"),
    }
    match git::find_git_remote_url(&git_dir).and_then(|url| git::find_git_slug(&url)) {
        Ok((provider, slug)) => {
            repo.provider = provider;
            repo.slug = slug;
        }
        Err(err) => warn!("Unable to determine git remote url: {err}"),
    }
    match git::find_git_branch(&git_dir) {
        Ok(branch) => repo.branch = branch,
        Err(err) => warn!("Unable to determine git branch: {err}"),
    }

    debug!("Setting repo provider={}", repo.provider);
    debug!("Setting repo name={}", repo.name);
    debug!("Setting repo revision={}", repo.revision);
    debug!("Setting repo slug={}", repo.slug);
    repo
}

/// Config path relative to the repository root (or the working directory outside a repo).
fn relative_mu_file(abs_path: &Path) -> Result<String> {
    let repo_dir: PathBuf = match git::find_git_directory(abs_path).and_then(|g| g.parent().map(Path::to_path_buf)) {
        Some(dir) => dir,
        None => env::current_dir().map_err(|e| Error::io(e, "getcwd", "."))?,
    };
    let relative = abs_path.strip_prefix(&repo_dir).unwrap_or(abs_path);
    debug!("Relative mu file: {}", relative.display());
    Ok(relative.to_string_lossy().into_owned())
}
