use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn livepatch_cmd(home: &Path, cwd: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("livepatch"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("RUST_LOG", "warn")
        .current_dir(cwd);
    cmd
}

fn write_config(dir: &Path, extra: &str) {
    let yaml = format!(
        "project_root: {root}\n\
         build:\n  tool: bin/lake\n\
         provider:\n  library: build/debug/libhreloader.so\n{extra}",
        root = dir.display(),
    );
    fs::write(dir.join("livepatch.yaml"), yaml).expect("write config");
}

#[test]
fn config_prints_resolved_yaml_from_the_working_directory() {
    let home = TempDir::new().expect("home");
    let project = TempDir::new().expect("project");
    write_config(project.path(), "trigger:\n  kind: interval\n  period_ms: 250\n");

    livepatch_cmd(home.path(), project.path())
        .arg("config")
        .assert()
        .success()
        .stdout(contains("livepatch.yaml"))
        .stdout(contains("tool: bin/lake"))
        .stdout(contains("period_ms: 250"))
        .stdout(contains("capacity: 1028"));
}

#[test]
fn config_path_flag_reports_user_fallback() {
    let home = TempDir::new().expect("home");
    let cwd = TempDir::new().expect("cwd");
    let user_dir = home.path().join(".livepatch");
    fs::create_dir_all(&user_dir).expect("mkdir");
    write_config(&user_dir, "");
    fs::rename(user_dir.join("livepatch.yaml"), user_dir.join("config.yaml")).expect("rename");

    livepatch_cmd(home.path(), cwd.path())
        .args(["config", "--path"])
        .assert()
        .success()
        .stdout(contains(".livepatch"));
}

#[test]
fn missing_config_is_reported_with_searched_locations() {
    let home = TempDir::new().expect("home");
    let cwd = TempDir::new().expect("cwd");

    livepatch_cmd(home.path(), cwd.path())
        .arg("config")
        .assert()
        .failure()
        .stderr(contains("no livepatch config found"))
        .stderr(contains("livepatch.yaml"));
}

#[test]
fn invalid_field_is_named() {
    let home = TempDir::new().expect("home");
    let project = TempDir::new().expect("project");
    write_config(project.path(), "table:\n  capacity: 0\n");

    livepatch_cmd(home.path(), project.path())
        .arg("config")
        .assert()
        .failure()
        .stderr(contains("table.capacity"));
}

#[test]
fn check_fails_when_the_provider_library_is_missing() {
    let home = TempDir::new().expect("home");
    let project = TempDir::new().expect("project");
    write_config(project.path(), "");

    livepatch_cmd(home.path(), project.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(contains("libhreloader.so"));
}

#[test]
fn reload_loop_is_not_offered_as_a_subcommand() {
    let home = TempDir::new().expect("home");

    livepatch_cmd(home.path(), home.path())
        .arg("run")
        .assert()
        .failure()
        .stderr(contains("unrecognized subcommand"));
}
