//! Integration tests for the tape-tool CLI.

use env_logger as _;
use interposer_core as _;
use log as _;
use serde_json as _;
use tape_tool as _;
use thiserror as _;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn binary_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.join("tape-tool")
}

fn run(args: &[&str]) -> Output {
    Command::new(binary_path())
        .args(args)
        .output()
        .expect("failed to run tape-tool")
}

fn formatted_image(dir: &Path) -> PathBuf {
    let image = dir.join("blank.tape");
    let output = run(&["format", image.to_str().unwrap()]);
    assert!(output.status.success());
    image
}

fn summary_field(line: &str, name: &str) -> u32 {
    let mut words = line.split_whitespace();
    while let Some(word) = words.next() {
        if word == name {
            return words.next().unwrap().parse().unwrap();
        }
    }
    panic!("no {name} in {line}");
}

#[test]
fn format_writes_full_two_track_image() {
    let temp_dir = tempfile::tempdir().unwrap();
    let image = formatted_image(temp_dir.path());
    assert_eq!(fs::metadata(&image).unwrap().len(), 2 * 0x2_0000 * 2);
}

#[test]
fn write_then_read_round_trips_payload() {
    let temp_dir = tempfile::tempdir().unwrap();
    let image = formatted_image(temp_dir.path());

    let written = run(&["write", image.to_str().unwrap(), "HELLO"]);
    assert!(written.status.success());
    assert!(String::from_utf8_lossy(&written.stdout).contains("Recorded 5 bytes"));

    let read = run(&["read", image.to_str().unwrap(), "5"]);
    assert!(read.status.success());
    assert_eq!(String::from_utf8_lossy(&read.stdout).trim(), "48 45 4C 4C 4F");
}

#[test]
fn inspect_reports_recorded_block() {
    let temp_dir = tempfile::tempdir().unwrap();
    let image = formatted_image(temp_dir.path());
    assert!(run(&["write", image.to_str().unwrap(), "abc"]).status.success());

    let output = run(&["inspect", image.to_str().unwrap(), "--block", "1"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().next().unwrap();
    assert_eq!(summary_field(line, "syncs"), 1);
    assert_eq!(summary_field(line, "data"), 3);

    let overview = run(&["inspect", image.to_str().unwrap()]);
    assert!(String::from_utf8_lossy(&overview.stdout).contains("1 of 256 blocks hold recorded cells"));
}

#[test]
fn config_file_is_applied() {
    let temp_dir = tempfile::tempdir().unwrap();
    let image = formatted_image(temp_dir.path());
    let config = temp_dir.path().join("config.json");
    fs::write(
        &config,
        r#"{"tape": {"insert_delay_ticks": 0, "write_protected": true}}"#,
    )
    .unwrap();

    let output = run(&[
        "write",
        image.to_str().unwrap(),
        "XY",
        "--config",
        config.to_str().unwrap(),
    ]);
    assert!(output.status.success());

    let inspect = run(&["inspect", image.to_str().unwrap(), "--block", "1"]);
    let stdout = String::from_utf8_lossy(&inspect.stdout);
    assert_eq!(summary_field(stdout.lines().next().unwrap(), "data"), 0);
}

#[test]
fn oversized_geometry_is_rejected_before_formatting() {
    let temp_dir = tempfile::tempdir().unwrap();
    let image = temp_dir.path().join("huge.tape");
    let config = temp_dir.path().join("config.json");
    fs::write(
        &config,
        r#"{"tape": {"geometry": {"track_offset_cells": 4294967285}}}"#,
    )
    .unwrap();

    let output = run(&[
        "format",
        image.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("exceeds the image limit"));
    assert!(!image.exists());
}

#[test]
fn read_of_blank_tape_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    let image = formatted_image(temp_dir.path());

    let output = run(&["read", image.to_str().unwrap(), "4"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no record found"));
}

#[test]
fn missing_image_is_reported() {
    let temp_dir = tempfile::tempdir().unwrap();
    let missing = temp_dir.path().join("missing.tape");

    let output = run(&["write", missing.to_str().unwrap(), "x"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing.tape"));
}

#[test]
fn unknown_command_prints_usage() {
    let output = run(&["rewind"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown command: rewind"));
    assert!(stderr.contains("Usage: tape-tool"));
}
