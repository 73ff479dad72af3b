//! Smoke tests -- verify the binary runs and the startup preconditions hold.

use assert_cmd::Command;
use predicates::prelude::*;

fn deploydeck(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("deploydeck").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("DEPLOYDECK_CONFIG")
        .env_remove("SSH_HOST")
        .env_remove("SSH_PORT")
        .env_remove("SSH_USERNAME")
        .env_remove("SSH_PASSWORD")
        .env_remove("DEPLOY_PATH")
        .env_remove("DEPLOY_SCRIPT");
    cmd
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("deploydeck")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("One-click remote deployment"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("deploydeck")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("deploydeck"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("deploydeck")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_serve_refuses_to_start_without_password() {
    let dir = tempfile::TempDir::new().unwrap();
    deploydeck(&dir)
        .args(["serve", "--bind", "127.0.0.1:0"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("password is not configured"));
}

#[test]
fn test_run_refuses_to_start_without_password() {
    let dir = tempfile::TempDir::new().unwrap();
    deploydeck(&dir)
        .arg("run")
        .assert()
        .failure()
        .stderr(predicates::str::contains("password is not configured"));
}

#[test]
fn test_show_config_redacts_password() {
    let dir = tempfile::TempDir::new().unwrap();
    deploydeck(&dir)
        .args(["show-config", "--json"])
        .env("SSH_PASSWORD", "hunter2")
        .env("SSH_HOST", "build.internal")
        .assert()
        .success()
        .stdout(predicates::str::contains("\"has_password\": true"))
        .stdout(predicates::str::contains("build.internal"))
        .stdout(predicates::str::contains("hunter2").not());
}

#[test]
fn test_show_config_reads_local_file() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("deploydeck.toml"),
        "[deploy]\nscript = \"./release.sh\"\n",
    )
    .unwrap();

    deploydeck(&dir)
        .arg("show-config")
        .assert()
        .success()
        .stdout(predicates::str::contains("./release.sh"))
        .stdout(predicates::str::contains("NOT SET"));
}

#[test]
fn test_dotenv_file_supplies_password() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(".env"),
        "SSH_PASSWORD=from-dotenv\nDEPLOY_SCRIPT=./ship.sh\n",
    )
    .unwrap();

    deploydeck(&dir)
        .args(["show-config", "--json"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"has_password\": true"))
        .stdout(predicates::str::contains("./ship.sh"))
        .stdout(predicates::str::contains("from-dotenv").not());
}

#[test]
fn test_real_environment_wins_over_dotenv() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "SSH_HOST=from-dotenv.internal\n").unwrap();

    deploydeck(&dir)
        .args(["show-config", "--json"])
        .env("SSH_HOST", "from-env.internal")
        .assert()
        .success()
        .stdout(predicates::str::contains("from-env.internal"))
        .stdout(predicates::str::contains("from-dotenv.internal").not());
}
