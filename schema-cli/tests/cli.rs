//! End-to-end exercises of the `schema-cli` binary against a `LogCask`
//! file in a temp directory, covering spec.md §8 scenarios S1-S3 and S6
//! from the outside: init, DDL, and a drop that removes storage.

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn write_config(dir: &TempDir) -> std::path::PathBuf {
    let config_path = dir.path().join("schema-cli.toml");
    let storage_path = dir.path().join("schema-manager.db");
    let log_dir = dir.path().join("logs");
    std::fs::write(
        &config_path,
        format!(
            "storage_path = {:?}\nstorage_backend = \"LogCask\"\nclear_incompatible_data = false\nlog_dir = {:?}\nlog_level = \"info\"\n",
            storage_path.to_str().unwrap(),
            log_dir.to_str().unwrap(),
        ),
    )
    .unwrap();
    config_path
}

fn cli(config: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("schema-cli").unwrap();
    cmd.arg("--config").arg(config);
    cmd
}

#[test]
fn init_reports_generation_zero() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    cli(&config).arg("init").assert().success().stdout(contains("generation: 0"));
}

#[test]
fn create_table_then_status_then_drop() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);

    cli(&config).arg("init").assert().success();

    cli(&config)
        .args(["create-table", "inventory.widgets(id:bigint, name:text)"])
        .assert()
        .success()
        .stdout(contains("generation now 1"));

    cli(&config).arg("status").assert().success().stdout(contains("widgets"));

    cli(&config)
        .args(["drop-table", "inventory.widgets"])
        .assert()
        .success()
        .stdout(contains("generation now 2"));

    cli(&config).arg("status").assert().success().stdout(contains("generation: 2").and(contains("widgets").not()));
}

#[test]
fn state_persists_across_separate_invocations() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);

    cli(&config).args(["create-table", "a.t(x:int)"]).assert().success();
    cli(&config).arg("status").assert().success().stdout(contains("schema a").and(contains("table t")));
}

#[test]
fn rejects_malformed_table_spec() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    cli(&config).args(["create-table", "not-a-spec"]).assert().failure();
}
