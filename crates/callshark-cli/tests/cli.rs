use std::fs;
use std::io::Write;
use std::process::Stdio;
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

const LOCAL: &str = "192.168.1.20";

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("callshark"))
}

fn repo_root() -> std::path::PathBuf {
    let manifest = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest
        .parent()
        .and_then(|p| p.parent())
        .expect("repo root")
        .to_path_buf()
}

fn sample_capture() -> std::path::PathBuf {
    repo_root()
        .join("tests")
        .join("fixtures")
        .join("two_way_call.txt")
}

/// `monitor` invocation replaying a file with short windows and a small
/// discovery budget.
fn replay(input: impl AsRef<std::ffi::OsStr>) -> Command {
    let mut cmd = cmd();
    cmd.arg("monitor")
        .arg("--input")
        .arg(input)
        .args(["--local-addr", LOCAL])
        .args(["--discovery-packets", "4"])
        .args(["--window-secs", "0.2"]);
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    let stdout = String::from_utf8(output.stdout.clone()).expect("utf8 stdout");
    serde_json::from_str(&stdout).expect("valid json")
}

#[test]
fn help_lists_capture_options() {
    cmd()
        .arg("monitor")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("--interface").and(contains("--local-addr")));
}

#[test]
fn version_reports_build_commit() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains("callshark").and(contains(env!("CARGO_PKG_VERSION"))));
}

#[test]
fn monitor_requires_an_input() {
    cmd()
        .arg("monitor")
        .assert()
        .failure()
        .stderr(contains("error:"));
}

#[test]
fn missing_input_shows_error_and_hint() {
    let temp = TempDir::new().expect("tempdir");
    let missing = temp.path().join("missing.txt");

    replay(missing)
        .arg("--stdout")
        .assert()
        .failure()
        .stderr(contains("error:").and(contains("hint:")));
}

#[test]
fn replayed_call_writes_json_to_stdout() {
    let assert = replay(sample_capture()).arg("--stdout").assert().success();
    let report = stdout_json(assert.get_output());

    assert_eq!(report["report_version"], 1);
    assert_eq!(report["tool"]["name"], "callshark");
    assert_eq!(report["call_found"], true);
    assert_eq!(report["discovery"]["outgoing"]["src"], LOCAL);
    assert_eq!(report["discovery"]["outgoing"]["dst"], "34.120.10.5");
    assert_eq!(report["discovery"]["incoming"]["dst"], LOCAL);
    assert_eq!(report["discovery"]["packets_classified"], 4);
    assert_eq!(report["aggregation"]["lines_dropped"], 1);
}

#[test]
fn stdin_replay_matches_file_replay() {
    let capture = fs::read_to_string(sample_capture()).expect("read fixture");
    let assert = replay("-")
        .arg("--stdout")
        .write_stdin(capture)
        .assert()
        .success();
    let report = stdout_json(assert.get_output());
    assert_eq!(report["call_found"], true);
    assert_eq!(report["discovery"]["incoming"]["src"], "34.120.10.5");
}

#[test]
fn one_sided_capture_reports_no_call() {
    let temp = TempDir::new().expect("tempdir");
    let input = temp.path().join("outgoing_only.txt");
    let lines: String = (0..6)
        .map(|i| {
            format!(
                "{}.0 {} {LOCAL} -> 34.120.10.5 UDP 1242 50124 -> 3478 Len=1200\n",
                i,
                i + 1
            )
        })
        .collect();
    fs::write(&input, lines).expect("write capture");

    let assert = replay(&input)
        .arg("--stdout")
        .assert()
        .failure()
        .stderr(contains("no call streams").and(contains("hint:")));
    let report = stdout_json(assert.get_output());
    assert_eq!(report["call_found"], false);
    assert!(report["discovery"]["incoming"].is_null());
    assert!(report.get("aggregation").is_none());
}

#[test]
fn report_file_is_written() {
    let temp = TempDir::new().expect("tempdir");
    let report = temp.path().join("out").join("report.json");

    replay(sample_capture())
        .arg("-o")
        .arg(&report)
        .arg("--pretty")
        .assert()
        .success()
        .stderr(contains("OK: report written"));

    let json = fs::read_to_string(&report).expect("read report");
    assert!(json.contains('\n'));
    let value: Value = serde_json::from_str(&json).expect("valid json");
    assert_eq!(value["call_found"], true);
}

#[test]
fn quiet_suppresses_ok_message() {
    let temp = TempDir::new().expect("tempdir");
    let report = temp.path().join("report.json");

    replay(sample_capture())
        .arg("-o")
        .arg(report)
        .arg("--quiet")
        .assert()
        .success()
        .stderr(contains("OK:").not());
}

#[test]
fn report_path_must_differ_from_input() {
    let temp = TempDir::new().expect("tempdir");
    let input = temp.path().join("capture.txt");
    fs::copy(sample_capture(), &input).expect("copy fixture");

    replay(&input)
        .arg("-o")
        .arg(&input)
        .assert()
        .failure()
        .stderr(contains("report path must differ from input"));
}

#[test]
fn stdout_and_report_conflict() {
    let temp = TempDir::new().expect("tempdir");
    let report = temp.path().join("report.json");

    replay(sample_capture())
        .arg("--stdout")
        .arg("-o")
        .arg(report)
        .assert()
        .failure()
        .stderr(contains("error:"));
}

#[test]
fn pretty_and_compact_conflict() {
    replay(sample_capture())
        .arg("--stdout")
        .arg("--pretty")
        .arg("--compact")
        .assert()
        .failure()
        .stderr(contains("error:"));
}

#[test]
fn interface_and_input_conflict() {
    replay(sample_capture())
        .args(["--interface", "lo"])
        .assert()
        .failure()
        .stderr(contains("error:"));
}

#[test]
fn zero_window_is_rejected() {
    cmd()
        .arg("monitor")
        .arg("--input")
        .arg(sample_capture())
        .args(["--local-addr", LOCAL])
        .args(["--window-secs", "0"])
        .assert()
        .failure()
        .stderr(contains("window duration must be greater than zero"));
}

#[test]
fn missing_capture_program_shows_hint() {
    let temp = TempDir::new().expect("tempdir");
    let program = temp.path().join("no-such-tshark");

    cmd()
        .arg("monitor")
        .args(["--interface", "lo"])
        .arg("--tshark")
        .arg(program)
        .args(["--local-addr", LOCAL])
        .assert()
        .failure()
        .stderr(contains("failed to start capture program").and(contains("hint:")));
}

#[test]
fn glob_matching_several_files_is_rejected() {
    let temp = TempDir::new().expect("tempdir");
    for name in ["a.txt", "b.txt"] {
        fs::copy(sample_capture(), temp.path().join(name)).expect("copy fixture");
    }

    replay(temp.path().join("*.txt"))
        .arg("--stdout")
        .assert()
        .failure()
        .stderr(contains("multiple files match pattern"));
}

#[test]
fn live_stdin_scores_windows_and_prints_scoreboard() {
    let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin!("callshark"))
        .arg("monitor")
        .args(["--input", "-"])
        .args(["--local-addr", LOCAL])
        .args(["--discovery-packets", "4"])
        .args(["--window-secs", "0.2"])
        .arg("--stdout")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn callshark");

    let mut stdin = child.stdin.take().expect("stdin");
    let mut capture = String::new();
    for (i, t) in [0.0, 0.05, 0.09, 0.13, 0.17].iter().enumerate() {
        capture.push_str(&format!(
            "{t} {} {LOCAL} -> 34.120.10.5 UDP 500 50124 -> 3478 Len=458\n",
            2 * i + 1
        ));
        capture.push_str(&format!(
            "{t} {} 34.120.10.5 -> {LOCAL} UDP 500 3478 -> 50124 Len=458\n",
            2 * i + 2
        ));
    }
    stdin.write_all(capture.as_bytes()).expect("write capture");
    stdin.flush().expect("flush capture");
    // Keep the pipe open across several windows before ending the call.
    thread::sleep(Duration::from_millis(1200));
    drop(stdin);

    let output = child.wait_with_output().expect("wait for callshark");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {stderr}");
    assert!(stderr.contains("window 1:"), "stderr: {stderr}");
    assert!(stderr.contains("quality  1/10"), "stderr: {stderr}");

    let report = stdout_json(&output);
    assert!(report["windows_scored"].as_u64().expect("windows_scored") >= 1);
    let qualities = report["history"]["quality"]
        .as_array()
        .expect("quality history");
    assert!(!qualities.is_empty());
    assert!(qualities.iter().all(|q| q == 1), "{qualities:?}");
    assert_eq!(report["mean_quality"], 1.0);
}

#[cfg(unix)]
#[test]
fn failing_capture_program_is_reported() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().expect("tempdir");
    let program = temp.path().join("fake-tshark");
    fs::write(
        &program,
        "#!/bin/sh\necho \"$2: permission denied\" >&2\nexit 2\n",
    )
    .expect("write script");
    fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).expect("chmod script");

    cmd()
        .arg("monitor")
        .args(["--interface", "eth9"])
        .arg("--tshark")
        .arg(&program)
        .args(["--local-addr", LOCAL])
        .arg("--stdout")
        .assert()
        .failure()
        .stderr(
            contains("capture program")
                .and(contains("failed"))
                .and(contains("capture permissions")),
        );
}

#[test]
fn stop_message_ends_a_session_waiting_on_idle_stdin() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("free port")
        .port();
    let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin!("callshark"))
        .arg("monitor")
        .args(["--input", "-"])
        .args(["--local-addr", LOCAL])
        .args(["--discovery-packets", "4"])
        .args(["--stop-port", &port.to_string()])
        .arg("--stdout")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn callshark");

    // Discovery completes, then the pipe stays open and silent.
    let mut stdin = child.stdin.take().expect("stdin");
    let capture = fs::read_to_string(sample_capture()).expect("read fixture");
    stdin.write_all(capture.as_bytes()).expect("write capture");
    stdin.flush().expect("flush capture");
    thread::sleep(Duration::from_millis(300));

    let mut control = None;
    for _ in 0..100 {
        match std::net::TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => {
                control = Some(stream);
                break;
            }
            Err(_) => thread::sleep(Duration::from_millis(50)),
        }
    }
    control
        .expect("stop listener")
        .write_all(b"Stop")
        .expect("send stop");

    let started = Instant::now();
    while child.try_wait().expect("poll callshark").is_none() {
        if started.elapsed() > Duration::from_secs(10) {
            let _ = child.kill();
            panic!("callshark kept running after the stop message");
        }
        thread::sleep(Duration::from_millis(50));
    }

    let output = child.wait_with_output().expect("collect output");
    drop(stdin);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("stop command received"), "stderr: {stderr}");
    assert!(stdout_json(&output).get("call_found").is_some());
}
