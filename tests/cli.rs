#![cfg(not(target_arch = "wasm32"))]

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use oxlink::Snapshot;
use predicates::prelude::*;
use tempfile::tempdir;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

#[test]
fn replay_writes_resulting_snapshot() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let output_path = tmp.path().join("result.json");

    let mut cmd = Command::cargo_bin("oxlink")?;
    cmd.arg("replay")
        .arg("--snapshot")
        .arg(fixture("two_boxes.json"))
        .arg("--script")
        .arg(fixture("expand_and_add.json"))
        .arg("--output")
        .arg(&output_path);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("4 steps, 0 failed"));

    let result = Snapshot::from_json(&fs::read_to_string(&output_path)?)?;
    assert_eq!(result.element_count(), 3);
    assert_eq!(result.link_count(), 3);
    assert!(result.get(&"ab".into()).is_none(), "expanded link should be replaced");

    Ok(())
}

#[test]
fn replay_to_stdout_keeps_report_on_stderr() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("oxlink")?;
    cmd.arg("replay")
        .arg("-s")
        .arg(fixture("two_boxes.json"))
        .arg("-x")
        .arg(fixture("expand_and_add.json"))
        .arg("-o")
        .arg("-");

    let output = cmd.assert().success().get_output().clone();
    let snapshot = Snapshot::from_json(std::str::from_utf8(&output.stdout)?)?;
    assert_eq!(snapshot.link_count(), 3);
    assert!(String::from_utf8(output.stderr)?.contains("0 failed"));

    Ok(())
}

#[test]
fn failing_step_is_reported_and_exits_nonzero() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("oxlink")?;
    cmd.arg("replay")
        .arg("--snapshot")
        .arg(fixture("two_boxes.json"))
        .arg("--script")
        .arg(fixture("self_loop.json"));

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("FAILED").and(predicate::str::contains("self-connection")))
        .stderr(predicate::str::contains("1 of 1 script steps failed"));

    Ok(())
}

#[test]
fn json_report_lists_every_step() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("oxlink")?;
    cmd.arg("replay")
        .arg("--snapshot")
        .arg(fixture("two_boxes.json"))
        .arg("--script")
        .arg(fixture("expand_and_add.json"))
        .arg("--report")
        .arg("json");

    let output = cmd.assert().success().get_output().clone();
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["steps"].as_array().map(Vec::len), Some(4));
    assert!(report["names"]["c"].is_string());

    Ok(())
}

#[test]
fn inspect_lists_port_claims() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("oxlink")?;
    cmd.arg("inspect").arg("--snapshot").arg(fixture("two_boxes.json"));

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Elements: 2"))
        .stdout(predicate::str::contains("Links: 1"))
        .stdout(predicate::str::contains("a/right-1 -> ab"))
        .stdout(predicate::str::contains("b/left-3 -> ab"));

    Ok(())
}

#[test]
fn inspect_json_counts_free_ports() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("oxlink")?;
    cmd.arg("inspect")
        .arg("--snapshot")
        .arg(fixture("two_boxes.json"))
        .arg("--json");

    let output = cmd.assert().success().get_output().clone();
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(summary["elements"], 2);
    assert_eq!(summary["shapes"][0]["free"], 3);
    assert_eq!(summary["claims"].as_array().map(Vec::len), Some(2));

    Ok(())
}

#[test]
fn missing_snapshot_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("oxlink")?;
    cmd.arg("inspect").arg("--snapshot").arg("does/not/exist.json");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));

    Ok(())
}

#[test]
fn config_file_overrides_ports_per_side() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let config_path = tmp.path().join("config.json");
    fs::write(&config_path, r#"{"ports_per_side": 2}"#)?;

    let mut cmd = Command::cargo_bin("oxlink")?;
    cmd.arg("inspect")
        .arg("--config")
        .arg(&config_path)
        .arg("--snapshot")
        .arg(fixture("two_boxes.json"));

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("a: 9 ports, 8 free"));

    Ok(())
}
