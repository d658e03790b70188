use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use filetime::{set_file_mtime, FileTime};
use predicates::str::contains;
use tempfile::TempDir;

fn golden_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("golden"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("RUST_LOG", "warn");
    cmd
}

fn repos_root(home: &Path) -> PathBuf {
    home.join(".golden/repos")
}

/// Master for `name` whose every entry predates any snapshot taken from now on.
fn local_master(home: &Path, name: &str) -> PathBuf {
    let master = repos_root(home).join(name);
    fs::create_dir_all(master.join("guides")).expect("master");
    fs::write(master.join("guides/intro.md"), "# Intro").expect("write");
    let old = FileTime::from_unix_time(FileTime::now().unix_seconds() - 7_200, 0);
    for path in [master.join("guides/intro.md"), master.join("guides"), master.clone()] {
        set_file_mtime(&path, old).expect("mtime");
    }
    master
}

fn add_repo(home: &Path, alias: &str, source: &str) {
    golden_cmd(home)
        .args(["repo", "add", alias, source])
        .assert()
        .success()
        .stdout(contains("registered"));
}

#[test]
fn repo_add_list_show_remove() {
    let home = TempDir::new().expect("home");
    add_repo(home.path(), "docs", "https://example.com/docs.git");
    add_repo(home.path(), "notes", "local://notes");

    let output = golden_cmd(home.path())
        .args(["repo", "list", "--json"])
        .output()
        .expect("list");
    assert!(output.status.success());
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let rows = rows.as_array().expect("array");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["alias"], "docs");
    assert_eq!(rows[0]["kind"], "remote");
    assert_eq!(rows[1]["kind"], "local");

    golden_cmd(home.path())
        .args(["repo", "show", "notes"])
        .assert()
        .success()
        .stdout(contains("local://notes"));

    golden_cmd(home.path())
        .args(["repo", "remove", "docs"])
        .assert()
        .success();
    golden_cmd(home.path())
        .args(["repo", "show", "docs"])
        .assert()
        .failure()
        .stderr(contains("is not registered"));
}

#[test]
fn duplicate_registration_is_rejected() {
    let home = TempDir::new().expect("home");
    add_repo(home.path(), "docs", "https://example.com/docs.git");
    golden_cmd(home.path())
        .args(["repo", "add", "docs", "https://example.com/other.git"])
        .assert()
        .failure()
        .stderr(contains("failed to register 'docs'"));
}

#[test]
fn scheduled_registration_is_due_immediately() {
    let home = TempDir::new().expect("home");
    golden_cmd(home.path())
        .args(["repo", "add", "docs", "https://example.com/docs.git", "--schedule", "--interval", "900"])
        .assert()
        .success();

    let output = golden_cmd(home.path())
        .args(["repo", "show", "docs"])
        .output()
        .expect("show");
    let record: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert!(record["next_refresh"].is_i64(), "{record}");
    assert_eq!(record["refresh_interval_secs"], 900);
}

#[test]
fn lock_lifecycle() {
    let home = TempDir::new().expect("home");

    golden_cmd(home.path())
        .args(["lock", "acquire", "notes", "--owner", "content-writer"])
        .assert()
        .success()
        .stdout(contains("locked"));
    golden_cmd(home.path())
        .args(["lock", "acquire", "notes-global", "--owner", "someone-else"])
        .assert()
        .failure()
        .stderr(contains("already held by 'content-writer'"));
    golden_cmd(home.path())
        .args(["lock", "status", "notes"])
        .assert()
        .success()
        .stdout(contains("held by content-writer"));
    golden_cmd(home.path())
        .args(["lock", "release", "notes", "--owner", "someone-else"])
        .assert()
        .failure();
    golden_cmd(home.path())
        .args(["lock", "release", "notes", "--force"])
        .assert()
        .success()
        .stdout(contains("released"));
    golden_cmd(home.path())
        .args(["lock", "status", "notes"])
        .assert()
        .success()
        .stdout(contains("unlocked"));
}

#[test]
fn local_refresh_snapshots_then_reports_no_changes() {
    let home = TempDir::new().expect("home");
    add_repo(home.path(), "notes", "local://notes");
    local_master(home.path(), "notes");

    golden_cmd(home.path())
        .args(["refresh", "notes"])
        .assert()
        .success()
        .stdout(contains("refreshed"));

    let output = golden_cmd(home.path())
        .args(["alias", "show", "notes", "--path"])
        .output()
        .expect("alias");
    let target = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    assert!(target.starts_with(repos_root(home.path()).join(".versioned/notes")));
    assert_eq!(
        fs::read_to_string(target.join("guides/intro.md")).expect("snapshot content"),
        "# Intro"
    );

    let output = golden_cmd(home.path())
        .args(["refresh", "notes", "--json"])
        .output()
        .expect("refresh");
    assert!(output.status.success());
    let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["action"]["kind"], "no_changes");
}

#[test]
fn local_refresh_skips_while_write_lock_is_held() {
    let home = TempDir::new().expect("home");
    add_repo(home.path(), "notes", "local://notes");
    local_master(home.path(), "notes");

    golden_cmd(home.path())
        .args(["lock", "acquire", "notes", "--owner", "content-writer"])
        .assert()
        .success();
    golden_cmd(home.path())
        .args(["refresh", "notes"])
        .assert()
        .success()
        .stdout(contains("refresh skipped: write lock held by content-writer"));
    golden_cmd(home.path())
        .args(["alias", "show", "notes"])
        .assert()
        .failure();
}

#[test]
fn refresh_of_unknown_alias_fails() {
    let home = TempDir::new().expect("home");
    golden_cmd(home.path())
        .args(["refresh", "ghost"])
        .assert()
        .failure()
        .stderr(contains("refresh of 'ghost' failed"));
}

#[test]
fn invalid_config_is_reported() {
    let home = TempDir::new().expect("home");
    fs::create_dir_all(home.path().join(".golden")).expect("dir");
    fs::write(
        home.path().join(".golden/config.yaml"),
        "jitter_percentage: 2.0\n",
    )
    .expect("config");
    golden_cmd(home.path())
        .args(["repo", "list"])
        .assert()
        .failure()
        .stderr(contains("jitter_percentage"));
}
