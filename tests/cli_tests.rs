//! Integration tests for the powergraph binary
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests

use predicates::prelude::*;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const SCENARIO: &str = r#"[{"kind":"cpu","method_name":"a.b.b","thread_id":10,"cpu_id":"0","timestamp":12344,"watts":10},{"kind":"disk","method_name":"a.b.b","thread_id":10,"cpu_id":"0","timestamp":12344,"watts":20}]
[{"kind":"cpu","method_name":"a.b.b","thread_id":10,"cpu_id":"0","timestamp":12345,"watts":11},{"kind":"cpu","method_name":"w.x.y","thread_id":11,"cpu_id":"1","timestamp":12345,"watts":10},{"kind":"disk","method_name":"w.x.y","thread_id":11,"cpu_id":"1","timestamp":12345,"watts":8}]

[{"kind":"cpu","method_name":"w.x.y","thread_id":12,"cpu_id":"0","timestamp":12346,"watts":1},{"kind":"disk","method_name":"w.x.y","thread_id":12,"cpu_id":"0","timestamp":12346,"watts":1}]
"#;

fn setup() -> (TempDir, std::path::PathBuf, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let samples = dir.path().join("samples.jsonl");
    let snapshot = dir.path().join("graph.json");
    fs::write(&samples, SCENARIO).unwrap();
    (dir, samples, snapshot)
}

#[test]
fn test_ingest_then_report() {
    let (_dir, samples, snapshot) = setup();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("powergraph");
    cmd.arg("--snapshot")
        .arg(&snapshot)
        .arg("-m")
        .arg("cli-run")
        .arg("ingest")
        .arg(&samples);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("batch 1: 1 cpu, 1 disk"))
        .stdout(predicate::str::contains("batch 3:"));

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("powergraph");
    cmd.arg("--snapshot")
        .arg(&snapshot)
        .arg("-m")
        .arg("cli-run")
        .arg("report")
        .arg("--at")
        .arg("12346");
    let output = cmd.output().unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["measurement_id"], "cli-run");
    assert_eq!(json["methods"].as_array().unwrap().len(), 2);
    assert_eq!(json["methods"][1]["name"], "w.x.y");
    assert_eq!(json["methods"][1]["power"], 11.0);
}

#[test]
fn test_ingest_rejects_malformed_input() {
    let dir = TempDir::new().unwrap();
    let samples = dir.path().join("bad.jsonl");
    fs::write(&samples, "[]\n{\"kind\":\n").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("powergraph");
    cmd.arg("ingest").arg(&samples);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn test_missing_input_file() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("powergraph");
    cmd.arg("ingest").arg("/nonexistent/samples.jsonl");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open"));
}

#[test]
fn test_config_file_is_used() {
    let (dir, samples, snapshot) = setup();
    let config = dir.path().join("powergraph.toml");
    fs::write(
        &config,
        format!(
            "measurement = \"from-config\"\nbridge_timeout_ms = 0\n[store]\nworkers = 0\nsnapshot_path = {:?}\n",
            snapshot
        ),
    )
    .unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("powergraph");
    cmd.arg("--config").arg(&config).arg("ingest").arg(&samples);
    cmd.assert().success();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("powergraph");
    cmd.arg("-c").arg(&config).arg("report").arg("--at").arg("12344");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"measurement_id\":\"from-config\""))
        .stdout(predicate::str::contains("\"power\":10.0"));
}

#[test]
fn test_invalid_config_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("powergraph.toml");
    fs::write(&config, "lock_stripes = 0\n").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("powergraph");
    cmd.arg("--config").arg(&config).arg("report").arg("--at").arg("0");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("lock_stripes"));
}

#[test]
fn test_report_unknown_measurement_fails_without_writing() {
    let (_dir, samples, snapshot) = setup();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("powergraph");
    cmd.arg("--snapshot")
        .arg(&snapshot)
        .arg("-m")
        .arg("cli-run")
        .arg("ingest")
        .arg(&samples);
    cmd.assert().success();
    let before = fs::read(&snapshot).unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("powergraph");
    cmd.arg("--snapshot")
        .arg(&snapshot)
        .arg("-m")
        .arg("wrong")
        .arg("report")
        .arg("--at")
        .arg("12346");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Unknown measurement 'wrong'"));

    assert_eq!(fs::read(&snapshot).unwrap(), before);
}

#[test]
fn test_stdin_batches_are_ingested_as_they_arrive() {
    let mut lines = SCENARIO.lines().filter(|l| !l.trim().is_empty());
    let mut child = Command::new(env!("CARGO_BIN_EXE_powergraph"))
        .args(["-m", "stream", "ingest", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    let stdout = child.stdout.take().unwrap();
    let (tx, rx) = mpsc::channel();
    let reader = thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            if tx.send(line.unwrap()).is_err() {
                break;
            }
        }
    });

    // The stream stays open: the first batch must be reported before EOF
    writeln!(stdin, "{}", lines.next().unwrap()).unwrap();
    stdin.flush().unwrap();
    let first = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(first.starts_with("batch 1: 1 cpu, 1 disk"), "{}", first);

    for line in lines {
        writeln!(stdin, "{}", line).unwrap();
    }
    drop(stdin);

    assert!(child.wait().unwrap().success());
    reader.join().unwrap();
    let rest: Vec<String> = rx.try_iter().collect();
    assert_eq!(rest.len(), 2);
    assert!(rest[1].starts_with("batch 3:"));
}
