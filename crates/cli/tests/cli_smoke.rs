//! Smoke tests for the nimbus binary. Everything here runs without cloud
//! credentials: these paths fail or finish before any backend call.

use assert_cmd::Command;
use predicates::prelude::*;

fn nimbus() -> Command {
  Command::cargo_bin("nimbus").unwrap()
}

#[test]
fn help_lists_subcommands() {
  nimbus()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("deploy"))
    .stdout(predicate::str::contains("plan"))
    .stdout(predicate::str::contains("status"))
    .stdout(predicate::str::contains("tail"))
    .stdout(predicate::str::contains("destroy"))
    .stdout(predicate::str::contains("init"));
}

#[test]
fn plan_fails_cleanly_without_config() {
  let temp = tempfile::tempdir().unwrap();
  nimbus()
    .current_dir(temp.path())
    .args(["plan", "--config", "missing.yml"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("failed to load"));
}

#[test]
fn init_scaffolds_a_loadable_project() {
  let temp = tempfile::tempdir().unwrap();
  nimbus()
    .current_dir(temp.path())
    .args(["init"])
    .assert()
    .success()
    .stdout(predicate::str::contains("scaffolded"));

  assert!(temp.path().join("nimbus.yml").exists());
  assert!(temp.path().join("src/app.py").exists());

  // A second init must refuse to overwrite.
  nimbus()
    .current_dir(temp.path())
    .args(["init"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("refusing to overwrite"));
}

#[test]
fn stage_only_requires_a_publishing_section() {
  let temp = tempfile::tempdir().unwrap();
  nimbus().current_dir(temp.path()).args(["init"]).assert().success();

  nimbus()
    .current_dir(temp.path())
    .args(["deploy", "--stage-only"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("publishing"));
}

#[test]
fn config_validation_errors_are_surfaced() {
  let temp = tempfile::tempdir().unwrap();
  std::fs::write(
    temp.path().join("nimbus.yml"),
    "name: broken\nfunction:\n  handler: ''\n  runtime: python3.12\n",
  )
  .unwrap();

  nimbus()
    .current_dir(temp.path())
    .args(["plan"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("handler"));
}
