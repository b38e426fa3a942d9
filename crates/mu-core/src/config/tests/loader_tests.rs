use std::fs;

use tempfile::tempdir;

use crate::config::loader::{discover_repo, substitute_env};
use crate::config::load_config;

#[test]
fn test_substitute_env() {
    // SAFETY: the variable name is unique to this test
    unsafe { std::env::set_var("MU_LOADER_TEST_VALUE", "resolved") };
    let out = substitute_env("a: ${env:MU_LOADER_TEST_VALUE}\nb: ${env:MU_LOADER_TEST_UNSET}\n").unwrap();
    assert_eq!(out, "a: resolved\nb: \n");
}

#[test]
fn test_load_missing_file() {
    let dir = tempdir().unwrap();
    let err = load_config(&dir.path().join("mu.yml")).unwrap_err();
    assert!(err.to_string().starts_with("Unable to find config file"));
}

#[test]
fn test_load_sets_basedir_and_repo() {
    let dir = tempdir().unwrap();
    let project = dir.path().join("checkout");
    fs::create_dir_all(project.join(".git/refs/heads")).unwrap();
    fs::write(project.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
    fs::write(project.join(".git/refs/heads/main"), "0123456789abcdef\n").unwrap();
    fs::write(
        project.join(".git/config"),
        "[core]\n\tbare = false\n[remote \"origin\"]\n\turl = git@github.com:acme/checkout.git\n",
    )
    .unwrap();
    fs::write(project.join("mu.yml"), "service:\n  name: web\n").unwrap();

    let config = load_config(&project.join("mu.yml")).unwrap();
    assert_eq!(config.basedir, project);
    assert_eq!(config.rel_mu_file, "mu.yml");
    assert_eq!(config.repo.name, "checkout");
    assert_eq!(config.repo.revision, "0123456");
    assert_eq!(config.repo.branch, "main");
    assert_eq!(config.repo.provider, "GitHub");
    assert_eq!(config.repo.slug, "acme/checkout");
}

#[test]
fn test_discover_repo_without_git() {
    let dir = tempdir().unwrap();
    let repo = discover_repo(dir.path());
    assert_eq!(repo.revision.len(), 14);
    assert!(repo.slug.is_empty());
}
