//! Integration tests for the `devwatch` CLI binary.
//!
//! Argument parsing, config management, and the one-shot backend commands
//! against a wiremock backend. No real broker is needed.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `devwatch` binary with env isolation.
///
/// Clears all `DEVWATCH_*` env vars and points the config file into
/// `config_dir` so tests never touch the user's real configuration.
fn devwatch_cmd(config_dir: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("devwatch");
    cmd.env("DEVWATCH_CONFIG", config_dir.join("config.toml"))
        .env("NO_COLOR", "1")
        .env_remove("DEVWATCH_PROFILE")
        .env_remove("DEVWATCH_BACKEND")
        .env_remove("DEVWATCH_WEBSOCKET")
        .env_remove("DEVWATCH_OUTPUT")
        .env_remove("DEVWATCH_TIMEOUT")
        .env_remove("DEVWATCH_LOG_FILE")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// Run a blocking CLI invocation without stalling the mock server.
async fn run_blocking(mut cmd: assert_cmd::Command) -> std::process::Output {
    tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let dir = tempfile::tempdir().unwrap();
    let output = devwatch_cmd(dir.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    let dir = tempfile::tempdir().unwrap();
    devwatch_cmd(dir.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("telemetry")
            .and(predicate::str::contains("track"))
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("status")),
    );
}

#[test]
fn test_version_flag() {
    let dir = tempfile::tempdir().unwrap();
    devwatch_cmd(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("devwatch"));
}

#[test]
fn test_track_requires_phone() {
    let dir = tempfile::tempdir().unwrap();
    devwatch_cmd(dir.path())
        .arg("track")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("PHONE"));
}

#[test]
fn test_invalid_output_format() {
    let dir = tempfile::tempdir().unwrap();
    devwatch_cmd(dir.path())
        .args(["--output", "xml", "devices"])
        .assert()
        .code(2);
}

#[test]
fn test_track_help_lists_flags() {
    let dir = tempfile::tempdir().unwrap();
    devwatch_cmd(dir.path())
        .args(["track", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--once")
                .and(predicate::str::contains("--keep-session"))
                .and(predicate::str::contains("--wait")),
        );
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    let dir = tempfile::tempdir().unwrap();
    devwatch_cmd(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("devwatch"));
}

#[test]
fn test_completions_zsh() {
    let dir = tempfile::tempdir().unwrap();
    devwatch_cmd(dir.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Config management ───────────────────────────────────────────────

#[test]
fn test_config_path_honours_env() {
    let dir = tempfile::tempdir().unwrap();
    devwatch_cmd(dir.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_init_then_show() {
    let dir = tempfile::tempdir().unwrap();
    devwatch_cmd(dir.path())
        .args([
            "config",
            "init",
            "--name",
            "lab",
            "--url",
            "http://lab.example.com:8080",
            "--agent-id",
            "ops",
        ])
        .assert()
        .success();

    assert!(dir.path().join("config.toml").exists());

    devwatch_cmd(dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[profiles.lab]")
                .and(predicate::str::contains("http://lab.example.com:8080"))
                .and(predicate::str::contains(r#"default_profile = "lab""#))
                .and(predicate::str::contains(r#"agent_id = "ops""#)),
        );
}

#[test]
fn test_config_init_rejects_bad_url() {
    let dir = tempfile::tempdir().unwrap();
    devwatch_cmd(dir.path())
        .args(["config", "init", "--url", "not a url"])
        .assert()
        .code(2);
    assert!(!dir.path().join("config.toml").exists());
}

#[test]
fn test_config_use_unknown_profile() {
    let dir = tempfile::tempdir().unwrap();
    devwatch_cmd(dir.path())
        .args(["config", "init", "--url", "http://localhost:8080"])
        .assert()
        .success();

    let output = devwatch_cmd(dir.path())
        .args(["config", "use", "prod"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("prod"));
}

#[test]
fn test_missing_profile_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let output = devwatch_cmd(dir.path())
        .args(["--profile", "nope", "status", "s1"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("nope"));
}

// ── Backend commands ────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_devices_lists_backend_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/debug/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "deviceId": "d-1",
                "phoneNumber": "555",
                "lastUpdated": "2026-10-01T12:00:00",
                "deviceDetails": { "model": "Pixel 9" },
                "latestTelemetry": { "battery": 80 },
            }
        ])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut cmd = devwatch_cmd(dir.path());
    cmd.args(["--backend", &server.uri(), "devices"]);
    let output = run_blocking(cmd).await;
    assert!(output.status.success(), "{}", combined_output(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("555"));
    assert!(stdout.contains("Pixel 9"));

    let mut cmd = devwatch_cmd(dir.path());
    cmd.args(["--backend", &server.uri(), "-o", "json", "devices", "555"]);
    let output = run_blocking(cmd).await;
    assert!(output.status.success(), "{}", combined_output(&output));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["deviceId"], "d-1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_device_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/debug/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut cmd = devwatch_cmd(dir.path());
    cmd.args(["--backend", &server.uri(), "devices", "999"]);
    let output = run_blocking(cmd).await;
    assert_eq!(output.status.code(), Some(4));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_status_renders_phase() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/push/status/s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "sent",
            "fcmStatus": "delivered",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/push/status/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut cmd = devwatch_cmd(dir.path());
    cmd.args(["--backend", &server.uri(), "status", "s1"]);
    let output = run_blocking(cmd).await;
    assert!(output.status.success(), "{}", combined_output(&output));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Status: sent - delivered"));

    let mut cmd = devwatch_cmd(dir.path());
    cmd.args(["--backend", &server.uri(), "status", "gone"]);
    let output = run_blocking(cmd).await;
    assert_eq!(output.status.code(), Some(4));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_end_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/session/end"))
        .and(query_param("sessionId", "s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut cmd = devwatch_cmd(dir.path());
    cmd.args(["--backend", &server.uri(), "end", "s1"]);
    let output = run_blocking(cmd).await;
    assert!(output.status.success(), "{}", combined_output(&output));
}

// ── Track ───────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_track_rejected_push_exits_with_backend_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/push/send"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "message": "Device not registered" })),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut cmd = devwatch_cmd(dir.path());
    cmd.args(["--backend", &server.uri(), "track", "555"]);
    let output = run_blocking(cmd).await;
    assert_eq!(output.status.code(), Some(1));
    assert!(combined_output(&output).contains("Device not registered"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_track_once_via_status_poll() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/push/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sessionId": "s1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/push/status/s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "responded",
            "hasDeviceResponse": true,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/debug/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "deviceId": "d-1",
                "phoneNumber": "555",
                "deviceDetails": { "model": "Pixel 9" },
                "latestTelemetry": { "battery": 80 },
            }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/session/end"))
        .and(query_param("sessionId", "s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut cmd = devwatch_cmd(dir.path());
    cmd.args([
        "--backend",
        &server.uri(),
        "-o",
        "json",
        "track",
        "555",
        "--once",
        "--poll-interval",
        "1",
        "--wait",
        "20s",
    ]);
    let output = run_blocking(cmd).await;
    assert!(output.status.success(), "{}", combined_output(&output));

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["phone_number"], "555");
    assert_eq!(value["source"], "poll");
    assert_eq!(value["session_id"], "s1");
    assert_eq!(value["details"]["model"], "Pixel 9");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_track_keeps_listening_after_status_poll_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/push/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sessionId": "s1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/push/status/s1"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "boom" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/session/end"))
        .and(query_param("sessionId", "s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut cmd = devwatch_cmd(dir.path());
    cmd.args([
        "--backend",
        &server.uri(),
        "track",
        "555",
        "--poll-interval",
        "1",
        "--wait",
        "3s",
    ]);
    let output = run_blocking(cmd).await;
    let text = combined_output(&output);

    // Exits on the wait deadline, not on the poll error.
    assert_eq!(output.status.code(), Some(8), "{text}");
    assert!(text.contains("boom"), "{text}");
    assert!(text.contains("still listening for live updates"), "{text}");
}
