//! Repository metadata read straight from the `.git` directory.
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use regex::Regex;

use crate::kernel::error::{Error, Result};

/// Nearest `.git` directory at or above `from`.
pub fn find_git_directory(from: &Path) -> Option<PathBuf> {
    let start = if from.is_dir() { from } else { from.parent()? };
    debug!("Searching for git directory in {}", start.display());
    start.ancestors().map(|dir| dir.join(".git")).find(|git| git.is_dir())
}

/// Ref that HEAD points to (`refs/heads/<branch>`), or `None` for a detached HEAD.
fn read_head(git_dir: &Path) -> Result<(Option<String>, String)> {
    let head_file = git_dir.join("HEAD");
    let head = fs::read_to_string(&head_file).map_err(|e| Error::io(e, "read", &head_file))?;
    let head = head.trim();
    match head.strip_prefix("ref:") {
        Some(reference) => Ok((Some(reference.trim().to_string()), String::new())),
        None => Ok((None, head.to_string())),
    }
}

fn resolve_ref(git_dir: &Path, reference: &str) -> Result<String> {
    let ref_file = git_dir.join(reference);
    if let Ok(commit) = fs::read_to_string(&ref_file) {
        return Ok(commit.trim().to_string());
    }

    let packed_file = git_dir.join("packed-refs");
    let packed = fs::read_to_string(&packed_file).map_err(|e| Error::io(e, "read", &packed_file))?;
    packed
        .lines()
        .filter(|line| !line.starts_with('#') && !line.starts_with('^'))
        .filter_map(|line| line.split_once(' '))
        .find(|(_, name)| *name == reference)
        .map(|(commit, _)| commit.to_string())
        .ok_or_else(|| Error::parse("git ref", reference, "not found"))
}

/// Abbreviated (7 character) commit id of HEAD.
pub fn find_git_revision(git_dir: &Path) -> Result<String> {
    let commit = match read_head(git_dir)? {
        (Some(reference), _) => resolve_ref(git_dir, &reference)?,
        (None, commit) => commit,
    };
    if commit.len() < 7 {
        return Err(Error::parse("git revision", commit, "too short"));
    }
    Ok(commit[..7].to_string())
}

pub fn find_git_branch(git_dir: &Path) -> Result<String> {
    let (reference, _) = read_head(git_dir)?;
    let reference = reference.ok_or_else(|| Error::parse("git HEAD", git_dir.display().to_string(), "detached"))?;
    let branch = reference.strip_prefix("refs/heads/").unwrap_or(&reference).to_string();
    debug!("Found branch: {branch}");
    Ok(branch)
}

/// `url` of the `origin` remote.
pub fn find_git_remote_url(git_dir: &Path) -> Result<String> {
    let config_file = git_dir.join("config");
    let config = fs::read_to_string(&config_file).map_err(|e| Error::io(e, "read", &config_file))?;

    let mut in_origin = false;
    for line in config.lines().map(str::trim) {
        if line.starts_with('[') {
            in_origin = line.eq_ignore_ascii_case("[remote \"origin\"]");
            continue;
        }
        if !in_origin {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim().eq_ignore_ascii_case("url") {
                return Ok(value.trim().to_string());
            }
        }
    }
    Err(Error::parse("git config", config_file.display().to_string(), "no url for remote 'origin'"))
}

/// Provider and slug for a remote URL. Unknown hosts yield an empty provider and the URL as slug.
pub fn find_git_slug(url: &str) -> Result<(String, String)> {
    let patterns: [(&str, &str, &[usize]); 4] = [
        (r"^http(s?)://git-codecommit\.(.+)\.amazonaws.com/v1/repos/(.+)$", "CodeCommit", &[3]),
        (r"ssh://git-codecommit\.(.+)\.amazonaws.com/v1/repos/(.+)$", "CodeCommit", &[2]),
        (r"^http(s?)://.*github.com.*/(.+)/(.+)\.git$", "GitHub", &[2, 3]),
        (r"github.com:(.+)/(.+)\.git$", "GitHub", &[1, 2]),
    ];

    for (pattern, provider, groups) in patterns {
        let regex = Regex::new(pattern).map_err(|e| Error::parse("regex", pattern, e))?;
        if let Some(captures) = regex.captures(url) {
            let slug = groups
                .iter()
                .filter_map(|i| captures.get(*i).map(|m| m.as_str()))
                .collect::<Vec<_>>()
                .join("/");
            return Ok((provider.to_string(), slug));
        }
    }
    Ok((String::new(), url.to_string()))
}
