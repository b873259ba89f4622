// Command-line tests driving the built binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

fn credvault(home: &Path, backend: &str) -> Command {
    let mut cmd = Command::cargo_bin("credvault").unwrap();
    cmd.env("CREDVAULT_PASSWORD", "p@ss")
        .env_remove("CREDVAULT_CONFIG")
        .arg("--home")
        .arg(home)
        .arg("--backend")
        .arg(backend);
    cmd
}

#[test]
fn test_help() {
    Command::cargo_bin("credvault")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("recipients"));
}

#[test]
fn test_add_and_show_item() {
    let dir = tempdir().unwrap();
    let home = dir.path().join("vault");

    credvault(&home, "sqlite")
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Public key:").and(predicate::str::contains("age1")));
    assert!(home.join("db.sqlite").exists());

    credvault(&home, "sqlite")
        .args(["add", "--stdin", "password", "-t", "Mail", "-n", "work", "-u", "bob"])
        .args(["-s", "mail.example"])
        .write_stdin("s3cret\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Added item 1"));

    credvault(&home, "sqlite")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mail").and(predicate::str::contains("ns=work")));

    credvault(&home, "sqlite")
        .args(["show", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bob").and(predicate::str::contains("s3cret").not()));

    credvault(&home, "sqlite")
        .args(["show", "1", "--reveal"])
        .assert()
        .success()
        .stdout(predicate::str::contains("s3cret"));

    credvault(&home, "sqlite")
        .args(["rm", "1", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not implemented"));
}

#[test]
fn test_flat_file_remove_and_namespaces() {
    let dir = tempdir().unwrap();
    let home = dir.path().join("vault");

    credvault(&home, "json").arg("init").assert().success();
    credvault(&home, "json")
        .args(["add", "--stdin", "ssh", "-t", "Build box", "-n", "infra"])
        .args(["--host", "10.0.0.7", "-p", "2222", "-u", "ci"])
        .write_stdin("hunter2\n")
        .assert()
        .success();

    credvault(&home, "json")
        .arg("namespaces")
        .assert()
        .success()
        .stdout(predicate::str::contains("infra"));

    credvault(&home, "json")
        .args(["rm", "1", "--yes"])
        .assert()
        .success();

    credvault(&home, "json")
        .args(["show", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_init_twice_fails() {
    let dir = tempdir().unwrap();
    let home = dir.path().join("vault");

    credvault(&home, "json").arg("init").assert().success();
    credvault(&home, "json")
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already initialized"));
}
