//! Command execution tests against an isolated home directory
//!
//! Nothing here reaches a backend: commands that need one are run without an
//! API key and must fail before any request is made.

mod common;

use common::TestEnv;
use predicates::prelude::*;

// ====== Init ======

#[test]
fn test_init_creates_config_and_memory_dir() {
    let env = TestEnv::default();

    env.command()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initializing parley"));

    assert!(env.config_file().exists());
    assert!(env.memory_dir().is_dir());

    let written = std::fs::read_to_string(env.config_file()).unwrap();
    let config: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(config["backend"]["kind"], "openai");
    assert_eq!(config["agent"]["max_iterations"], 10);
}

#[test]
fn test_init_keeps_existing_config() {
    let env = TestEnv::default();
    env.write_config(r#"{"agent": {"model": "my-model"}}"#).unwrap();

    env.command().arg("init").assert().success();

    let written = std::fs::read_to_string(env.config_file()).unwrap();
    assert!(written.contains("my-model"));
}

// ====== Status ======

#[test]
fn test_status_without_config() {
    let env = TestEnv::default();

    env.command()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("parley status"))
        .stdout(predicate::str::contains("[Missing]"));
}

#[test]
fn test_status_reports_config() {
    let env = TestEnv::default();
    env.write_config(
        r#"{"backend": {"kind": "anthropic", "api_key": "sk-test"}, "agent": {"model": "claude-test"}}"#,
    )
    .unwrap();

    env.command()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Anthropic"))
        .stdout(predicate::str::contains("claude-test"))
        .stdout(predicate::str::contains("[Set]"));
}

#[test]
fn test_status_rejects_malformed_config() {
    let env = TestEnv::default();
    env.write_config("{ not json").unwrap();

    env.command()
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config json"));
}

// ====== Commands needing a backend ======

#[test]
fn test_ask_without_api_key_fails() {
    let env = TestEnv::default();

    env.command()
        .args(["ask", "-m", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No API key configured"));
}

#[test]
fn test_func_without_api_key_fails() {
    let env = TestEnv::default();

    env.command()
        .args(["func", "-p", "Echo.", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No API key configured"));
}

#[test]
fn test_func_rejects_invalid_shape() {
    let env = TestEnv::default();
    env.write_config(r#"{"backend": {"api_key": "sk-test"}}"#).unwrap();

    env.command()
        .args(["func", "-p", "Classify.", "--shape", "{label", "text"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--shape must be valid JSON"));
}
