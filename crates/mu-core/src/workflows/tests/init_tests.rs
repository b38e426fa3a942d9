use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::kernel::Error;
use crate::workflows::WorkflowError;
use crate::workflows::init::{InitOptions, initialize, validate_file};

/// A `web` checkout with an `origin` remote on GitHub.
fn checkout(root: &TempDir) -> PathBuf {
    let basedir = root.path().join("web");
    let git = basedir.join(".git");
    fs::create_dir_all(git.join("refs/heads")).unwrap();
    fs::write(git.join("HEAD"), "ref: refs/heads/master\n").unwrap();
    fs::write(git.join("refs/heads/master"), "0123456789abcdef0123456789abcdef01234567\n").unwrap();
    fs::write(
        git.join("config"),
        "[core]\n\tbare = false\n[remote \"origin\"]\n\turl = https://github.com/acme/web.git\n",
    )
    .unwrap();
    basedir
}

fn read_yaml(path: &Path) -> serde_yaml::Value {
    serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_initialize_writes_config_and_buildspec() {
    let root = TempDir::new().unwrap();
    let basedir = checkout(&root);

    let written = initialize(&basedir, &InitOptions::default()).unwrap();

    assert_eq!(written, vec![basedir.join("mu.yml"), basedir.join("buildspec.yml")]);
    let doc = read_yaml(&basedir.join("mu.yml"));
    assert_eq!(doc["service"]["name"].as_str(), Some("web"));
    assert_eq!(doc["service"]["port"].as_u64(), Some(8080));
    assert_eq!(doc["service"]["pipeline"]["source"]["provider"].as_str(), Some("GitHub"));
    assert_eq!(doc["service"]["pipeline"]["source"]["repo"].as_str(), Some("acme/web"));
    assert!(doc.get("environments").is_none());
    assert!(!fs::read_to_string(basedir.join("buildspec.yml")).unwrap().is_empty());

    let config = validate_file(&basedir.join("mu.yml")).unwrap();
    assert_eq!(config.service.name, "web");
}

#[test]
fn test_initialize_with_environments() {
    let root = TempDir::new().unwrap();
    let basedir = checkout(&root);
    let options = InitOptions {
        create_environments: true,
        port: 3000,
        ..Default::default()
    };

    initialize(&basedir, &options).unwrap();

    let config = validate_file(&basedir.join("mu.yml")).unwrap();
    let names: Vec<&str> = config.environments.iter().map(|env| env.name.as_str()).collect();
    assert_eq!(names, ["dev", "production"]);
    assert_eq!(config.service.port, Some(3000));
}

#[test]
fn test_existing_config_requires_force() {
    let root = TempDir::new().unwrap();
    let basedir = checkout(&root);
    fs::write(basedir.join("mu.yml"), "namespace: keep\n").unwrap();

    let err = initialize(&basedir, &InitOptions::default()).unwrap_err();

    assert!(matches!(err, Error::Workflow(WorkflowError::ConfigExists { .. })));
    assert!(err.to_string().contains("--force"), "{err}");
    assert_eq!(fs::read_to_string(basedir.join("mu.yml")).unwrap(), "namespace: keep\n");
    assert!(!basedir.join("buildspec.yml").exists());

    let forced = InitOptions {
        force: true,
        ..Default::default()
    };
    initialize(&basedir, &forced).unwrap();
    assert_ne!(fs::read_to_string(basedir.join("mu.yml")).unwrap(), "namespace: keep\n");
}

#[test]
fn test_initialize_outside_repository_fails() {
    let root = TempDir::new().unwrap();

    let err = initialize(root.path(), &InitOptions::default()).unwrap_err();

    assert!(matches!(err, Error::Workflow(WorkflowError::RepositoryUnknown { .. })));
    assert!(!root.path().join("mu.yml").exists());
}

#[test]
fn test_validate_file_rejects_bad_config() {
    let root = TempDir::new().unwrap();
    let path = root.path().join("mu.yml");
    fs::write(&path, "namespace: Bad_Namespace\nservice:\n  name: web\n").unwrap();

    assert!(validate_file(&path).is_err());
}
