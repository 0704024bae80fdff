//! CLI argument parsing smoke tests.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_commands() {
    Command::cargo_bin("codescope")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("index"))
        .stdout(predicate::str::contains("update"))
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn index_requires_url() {
    Command::cargo_bin("codescope")
        .unwrap()
        .arg("index")
        .assert()
        .failure()
        .stderr(predicate::str::contains("URL").or(predicate::str::contains("url")));
}

#[test]
fn update_requires_name() {
    Command::cargo_bin("codescope")
        .unwrap()
        .arg("update")
        .assert()
        .failure();
}

#[test]
fn unknown_provider_is_rejected_at_parse_time() {
    Command::cargo_bin("codescope")
        .unwrap()
        .args(["--provider", "bedrock", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown embedding provider"));
}

#[test]
fn graph_subcommands_parse() {
    Command::cargo_bin("codescope")
        .unwrap()
        .args(["graph", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("populate"))
        .stdout(predicate::str::contains("deps"))
        .stdout(predicate::str::contains("metrics"));
}
