//! Integration tests for the `ridelink` CLI binary.
//!
//! Argument parsing, help output, completions, and error handling run
//! without a backend; `status` runs against a wiremock query API.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `ridelink` binary with env isolation.
///
/// Clears all `RIDELINK_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn ridelink_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("ridelink");
    cmd.env("HOME", "/tmp/ridelink-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/ridelink-cli-test-nonexistent")
        .env_remove("RIDELINK_PROFILE")
        .env_remove("RIDELINK_SERVER")
        .env_remove("RIDELINK_API")
        .env_remove("RIDELINK_TOKEN")
        .env_remove("RIDELINK_RIDER")
        .env_remove("RIDELINK_OUTPUT")
        .env_remove("RIDELINK_TIMEOUT")
        .env_remove("RUST_LOG");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// Flags that stand in for a profile.
fn backend_args(api: &str) -> Vec<String> {
    vec![
        "--server".into(),
        "ws://127.0.0.1:9/socket".into(),
        "--api".into(),
        api.into(),
        "--token".into(),
        "test-token".into(),
    ]
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let output = ridelink_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn help_lists_commands() {
    ridelink_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("watch")
            .and(predicate::str::contains("search"))
            .and(predicate::str::contains("status"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn version_flag() {
    ridelink_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ridelink"));
}

#[test]
fn completions_zsh() {
    ridelink_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn config_path_names_the_app() {
    ridelink_cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ridelink").and(predicate::str::ends_with("config.toml\n")));
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn invalid_subcommand() {
    let output = ridelink_cmd().arg("foobar").output().unwrap();
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("foobar"));
}

#[test]
fn status_without_config_points_at_init() {
    let output = ridelink_cmd().args(["status", "r-1"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("config init"));
}

#[test]
fn unknown_profile_is_reported() {
    let output = ridelink_cmd()
        .args(["--profile", "work", "status", "r-1"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("'work'"));
}

#[test]
fn search_rejects_impossible_pickup() {
    let output = ridelink_cmd()
        .args(backend_args("http://127.0.0.1:9/api"))
        .args(["search", "r-1", "--lat", "123.0", "--lng", "10.0", "--offline"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("pickup"));
}

#[test]
fn watch_requires_a_rider() {
    let output = ridelink_cmd()
        .args(backend_args("http://127.0.0.1:9/api"))
        .args(["watch", "r-1"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("--rider"));
}

#[test]
fn server_url_scheme_is_checked() {
    let output = ridelink_cmd()
        .args([
            "--server",
            "https://127.0.0.1/socket",
            "--api",
            "http://127.0.0.1:9/api",
            "--token",
            "t",
            "status",
            "r-1",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("server"));
}

// ── Against a mock query API ────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn status_prints_backend_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rides/r-1/status"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "data": { "id": "r-1", "status": "in_progress", "version": 4 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = format!("{}/api", server.uri());
    let output = tokio::task::spawn_blocking(move || {
        ridelink_cmd()
            .args(backend_args(&api))
            .args(["-o", "json", "status", "r-1"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success(), "{}", combined_output(&output));
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["status"], "in_progress");
    assert_eq!(body["version"], 4);
    assert_eq!(body["terminal"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn status_of_unknown_ride_exits_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rides/missing/status"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "success": false,
            "error": "ride not found"
        })))
        .mount(&server)
        .await;

    let api = format!("{}/api", server.uri());
    let output = tokio::task::spawn_blocking(move || {
        ridelink_cmd()
            .args(backend_args(&api))
            .args(["status", "missing"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("'missing' not found"));
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_token_exits_with_auth_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let api = format!("{}/api", server.uri());
    let output = tokio::task::spawn_blocking(move || {
        ridelink_cmd()
            .args(backend_args(&api))
            .args(["-o", "plain", "status", "r-1"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(output.status.code(), Some(3));
}
