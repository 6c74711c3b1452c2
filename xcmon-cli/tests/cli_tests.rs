use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn xcmon_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("xcmon"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

#[test]
fn help_lists_every_subcommand() {
    let home = TempDir::new().expect("home");
    let assert = xcmon_cmd(home.path()).arg("--help").assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    for subcommand in ["serve", "path", "diagnostics", "status", "updates", "live", "build-server"] {
        assert!(stdout.contains(subcommand), "missing {subcommand} in:\n{stdout}");
    }
}

#[test]
fn queries_fail_cleanly_without_a_daemon() {
    let home = TempDir::new().expect("home");
    for args in [
        vec!["path"],
        vec!["diagnostics", "--json"],
        vec!["status"],
        vec!["updates", "--clear"],
        vec!["live"],
        vec!["build-server"],
    ] {
        xcmon_cmd(home.path())
            .args(&args)
            .assert()
            .failure()
            .stderr(contains("daemon is not running"));
    }
}

#[test]
fn unknown_flag_is_rejected() {
    let home = TempDir::new().expect("home");
    xcmon_cmd(home.path())
        .args(["diagnostics", "--yaml"])
        .assert()
        .failure()
        .stderr(contains("--yaml").and(contains("unexpected argument")));
}

#[test]
fn malformed_config_stops_serve() {
    let home = TempDir::new().expect("home");
    let dir = home.path().join(".xcmon");
    fs::create_dir_all(&dir).expect("config dir");
    fs::write(dir.join("config.yaml"), "poll_interval_secs: [unclosed").expect("config");

    xcmon_cmd(home.path())
        .arg("serve")
        .assert()
        .failure()
        .stderr(contains("config.yaml"));
}
