use std::{fs, path::Path};

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

fn document_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    fs::write(root.join(".doorstop.yml"), "settings:\n  prefix: REQ\n").expect("write settings");
    fs::write(
        root.join("I-1.yml"),
        "level: '1.0'\nnormative: false\ntext: |\n  # Intro\n  Hello\n",
    )
    .expect("write item");
    fs::write(root.join("I-2.yml"), "level: '1.1'\ntext: World\n").expect("write item");
    dir
}

fn reqview(cwd: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("reqview"));
    cmd.current_dir(cwd)
        .env_remove("REQVIEW_CONFIG_FILE")
        .env("REQVIEW__LOGGING__LEVEL", "warn");
    cmd
}

#[test]
fn render_prints_the_page_to_stdout() {
    let dir = document_dir();
    let assert = reqview(dir.path())
        .arg("render")
        .arg(dir.path())
        .assert()
        .success();

    let output = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(output.starts_with("<!DOCTYPE html>"));
    assert!(output.contains("<div id=\"I-1\" class=\"item\">"));
    assert!(output.contains("<h1 class=\"item-heading\">Intro</h1>"));
    assert!(output.contains("<td><p>World</p></td>"));
}

#[test]
fn render_writes_the_page_to_a_file() {
    let dir = document_dir();
    let out = tempfile::tempdir().expect("tempdir");
    let target = out.path().join("page.html");

    reqview(dir.path())
        .arg("render")
        .arg(dir.path())
        .arg("--output")
        .arg(&target)
        .assert()
        .success()
        .stdout("");

    let page = fs::read_to_string(&target).expect("page written");
    assert!(page.contains("<div id=\"I-2\" class=\"item\">"));
}

#[test]
fn render_events_stream_results_then_final_progress() {
    let dir = document_dir();
    let assert = reqview(dir.path())
        .arg("render")
        .arg(dir.path())
        .arg("--events")
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    let events: Vec<Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("event line is json"))
        .collect();

    let results: Vec<&str> = events
        .iter()
        .filter(|event| event["event"] == "result")
        .filter_map(|event| event["item_id"].as_str())
        .collect();
    assert_eq!(results, ["I-1", "I-2", "footer"]);

    let last = events.last().expect("at least one event");
    assert_eq!(last["event"], "progress");
    assert_eq!(last["value"], 100);
}

#[test]
fn focus_selects_and_highlights_an_item() {
    let dir = document_dir();
    reqview(dir.path())
        .arg("render")
        .arg(dir.path())
        .args(["--view", "item", "--focus", "I-2"])
        .assert()
        .success()
        .stdout(contains("<div id=\"I-2\" class=\"item selected\">"))
        .stdout(contains("<div id=\"I-1\" class=\"item\" style=\"display:none\">"));
}

#[test]
fn unknown_focus_fails_with_input_error() {
    let dir = document_dir();
    reqview(dir.path())
        .arg("render")
        .arg(dir.path())
        .args(["--focus", "REQ404"])
        .assert()
        .code(2)
        .stderr(contains("REQ404"));
}

#[test]
fn directory_without_settings_fails_fast() {
    let dir = tempfile::tempdir().expect("tempdir");
    reqview(dir.path())
        .arg("render")
        .arg(dir.path())
        .assert()
        .code(2)
        .stderr(contains(".doorstop.yml"));
}

#[test]
fn unknown_view_mode_is_rejected() {
    let dir = document_dir();
    reqview(dir.path())
        .arg("render")
        .arg(dir.path())
        .args(["--view", "tree"])
        .assert()
        .failure()
        .stderr(contains("unknown view mode"));
}
