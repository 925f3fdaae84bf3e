use assert_cmd::Command;
use predicates::prelude::*;

fn packsmith() -> Command {
    Command::cargo_bin("packsmith").expect("binary builds")
}

#[test]
fn test_help_lists_subcommands() {
    packsmith()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("run"));
}

#[test]
fn test_version_flag() {
    packsmith()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("packsmith"));
}

#[test]
fn test_run_unknown_job_fails() {
    let dir = tempfile::tempdir().unwrap();
    packsmith()
        .current_dir(dir.path())
        .args(["run", "--job", "no-such-job", "--db", "ledger.db"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_submit_requires_github_token() {
    let dir = tempfile::tempdir().unwrap();
    packsmith()
        .current_dir(dir.path())
        .env_remove("GITHUB_TOKEN")
        .args(["submit", "--title", "Demo App", "--db", "ledger.db"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GITHUB_TOKEN"));
}

#[test]
fn test_run_requires_job_argument() {
    packsmith()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--job"));
}
