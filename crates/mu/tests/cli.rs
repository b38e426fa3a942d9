use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const CONFIG: &str = r#"
namespace: acme
environments:
  - name: dev
service:
  name: web
  port: 8080
"#;

/// `mu` isolated from the user's home and state file, running in `dir`.
fn mu(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("mu").unwrap();
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env("MU_STATE_FILE", dir.join("state.json"))
        .env_remove("RUST_LOG");
    cmd
}

fn workspace(config: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("mu.yml"), config).unwrap();
    dir
}

#[test]
fn test_help_lists_commands() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;

    mu(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("environment"))
        .stdout(predicate::str::contains("service"))
        .stdout(predicate::str::contains("pipeline"))
        .stdout(predicate::str::contains("purge"));

    Ok(())
}

#[test]
fn test_short_v_is_verbose() -> Result<(), Box<dyn std::error::Error>> {
    let dir = workspace(CONFIG);

    mu(dir.path())
        .args(["-V", "environment", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No stacks found."));

    Ok(())
}

#[test]
fn test_long_version_flag() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;

    mu(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));

    Ok(())
}

#[test]
fn test_validate_accepts_good_config() -> Result<(), Box<dyn std::error::Error>> {
    let dir = workspace(CONFIG);

    mu(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Valid:"))
        .stdout(predicate::str::contains("acme"));

    Ok(())
}

#[test]
fn test_validate_rejects_bad_namespace() -> Result<(), Box<dyn std::error::Error>> {
    let dir = workspace("namespace: Bad_Namespace\n");

    mu(dir.path())
        .arg("validate")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("namespace"));

    Ok(())
}

#[test]
fn test_missing_explicit_config_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;

    mu(dir.path())
        .args(["--config", "other.yml", "environment", "list"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("other.yml"));

    Ok(())
}

#[test]
fn test_environment_list_empty() -> Result<(), Box<dyn std::error::Error>> {
    let dir = workspace(CONFIG);

    mu(dir.path())
        .args(["environment", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No stacks found."));

    Ok(())
}

#[test]
fn test_environment_list_json() -> Result<(), Box<dyn std::error::Error>> {
    let dir = workspace(CONFIG);

    let output = mu(dir.path())
        .args(["--silent", "environment", "list", "--format", "json"])
        .output()?;

    assert!(output.status.success());
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(listed, serde_json::json!([]));
    Ok(())
}

#[test]
fn test_dryrun_upsert_writes_templates() -> Result<(), Box<dyn std::error::Error>> {
    let dir = workspace(CONFIG);
    let output = dir.path().join("out");

    mu(dir.path())
        .args(["environment", "upsert", "dev", "--dryrun", "--dryrun-output"])
        .arg(&output)
        .assert()
        .success();

    for stack in ["acme-iam-common", "acme-vpc-dev", "acme-loadbalancer-dev", "acme-environment-dev"] {
        assert!(output.join(format!("template-{stack}.yml")).is_file(), "{stack}");
        assert!(output.join(format!("config-{stack}.json")).is_file(), "{stack}");
    }
    Ok(())
}

#[test]
fn test_unknown_environment_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = workspace(CONFIG);

    mu(dir.path())
        .args(["environment", "upsert", "qa", "--dryrun"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("qa"));

    Ok(())
}

#[test]
fn test_init_writes_config_once() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let git = dir.path().join(".git");
    fs::create_dir_all(git.join("refs/heads"))?;
    fs::write(git.join("HEAD"), "ref: refs/heads/main\n")?;
    fs::write(git.join("refs/heads/main"), "0123456789abcdef0123456789abcdef01234567\n")?;
    fs::write(
        git.join("config"),
        "[remote \"origin\"]\n\turl = https://github.com/acme/web.git\n",
    )?;

    mu(dir.path())
        .args(["init", "--env"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mu.yml"));
    assert!(dir.path().join("buildspec.yml").is_file());

    mu(dir.path())
        .arg("validate")
        .assert()
        .success();

    mu(dir.path())
        .arg("init")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--force"));

    Ok(())
}

#[test]
fn test_service_setenv_updates_config() -> Result<(), Box<dyn std::error::Error>> {
    let dir = workspace(CONFIG);

    mu(dir.path())
        .args(["service", "setenv", "dev", "LOG_LEVEL=debug"])
        .assert()
        .success();

    let body = fs::read_to_string(dir.path().join("mu.yml"))?;
    assert!(body.contains("LOG_LEVEL:"), "{body}");
    assert!(body.contains("dev: debug"), "{body}");

    mu(dir.path())
        .arg("validate")
        .assert()
        .success();
    Ok(())
}

#[test]
fn test_purge_empty_namespace() -> Result<(), Box<dyn std::error::Error>> {
    let dir = workspace(CONFIG);

    mu(dir.path())
        .args(["purge", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to purge"));

    Ok(())
}

#[test]
fn test_proxy_flag_is_validated() -> Result<(), Box<dyn std::error::Error>> {
    let dir = workspace(CONFIG);

    mu(dir.path())
        .args(["--proxy", "http://proxy.internal:3128", "environment", "list"])
        .assert()
        .success();

    mu(dir.path())
        .args(["--proxy", "http://[::1", "environment", "list"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("proxy"));

    Ok(())
}
