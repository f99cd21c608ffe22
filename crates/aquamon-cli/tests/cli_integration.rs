//! CLI Integration Tests
//!
//! These tests run the `aquamon` binary against a throwaway configuration
//! file and database. None of them need a sensor.
//!
//! ```
//! cargo test --package aquamon-cli --test cli_integration
//! ```

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// Isolated config and database for one test.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    fn db_path(&self) -> PathBuf {
        self.dir.path().join("aquamon.db")
    }

    /// Run aquamon and return its output.
    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_aquamon"))
            .args(args)
            .env("AQUAMON_CONFIG", self.config_path())
            .env("AQUAMON_DATABASE", self.db_path())
            .env_remove("AQUAMON_API_URL")
            .env_remove("AQUAMON_RELAY_URL")
            .env_remove("RUST_LOG")
            .env("NO_COLOR", "1")
            .output()
            .expect("Failed to run aquamon binary")
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "aquamon {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    fn run_json(&self, args: &[&str]) -> serde_json::Value {
        let stdout = self.run_ok(args);
        serde_json::from_str(&stdout)
            .unwrap_or_else(|e| panic!("aquamon {args:?} printed invalid JSON ({e}): {stdout}"))
    }
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_lists_commands() {
    let stdout = Sandbox::new().run_ok(&["--help"]);
    for command in ["config", "read", "watch", "reading", "sync", "tank", "auth", "completions"] {
        assert!(stdout.contains(command), "help should mention '{command}'");
    }
}

#[test]
fn test_version() {
    let stdout = Sandbox::new().run_ok(&["--version"]);
    assert!(stdout.starts_with("aquamon "));
}

#[test]
fn test_completions_bash() {
    let stdout = Sandbox::new().run_ok(&["completions", "bash"]);
    assert!(stdout.contains("aquamon"));
}

#[test]
fn test_unknown_command_fails() {
    let output = Sandbox::new().run(&["frobnicate"]);
    assert!(!output.status.success());
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_config_path_follows_env() {
    let sandbox = Sandbox::new();
    let stdout = sandbox.run_ok(&["config", "path"]);
    assert_eq!(Path::new(stdout.trim()), sandbox.config_path());
}

#[test]
fn test_config_set_persists() {
    let sandbox = Sandbox::new();
    sandbox.run_ok(&["config", "set", "poll-interval-ms", "1500"]);
    let json = sandbox.run_json(&["--json", "config", "show"]);
    assert_eq!(json["settings"]["poll_interval_ms"], 1500);

    let output = sandbox.run(&["config", "set", "poll-interval-ms", "0"]);
    assert!(!output.status.success());
}

#[test]
fn test_config_http_and_use() {
    let sandbox = Sandbox::new();
    sandbox.run_ok(&["config", "http", "192.168.4.1", "--port", "8080"]);
    let json = sandbox.run_json(&["--json", "config", "show"]);
    assert_eq!(json["devices"]["connectionType"], "wifi");
    assert_eq!(json["devices"]["http"]["ip"], "192.168.4.1");
    assert_eq!(json["devices"]["http"]["port"], "8080");
    assert_eq!(json["devices"]["http"]["isConfigured"], true);

    let output = sandbox.run(&["config", "use", "ble"]);
    assert!(output.status.success());
    assert!(stderr(&output).contains("not configured"));

    sandbox.run_ok(&["config", "ble", "--name", "ESP32-Turbidez"]);
    let json = sandbox.run_json(&["--json", "config", "show"]);
    assert_eq!(json["devices"]["connectionType"], "bluetooth");
    assert_eq!(json["devices"]["ble"]["deviceName"], "ESP32-Turbidez");
}

#[test]
fn test_config_http_rejects_bad_port() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["config", "http", "192.168.4.1", "--port", "eighty"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("port"));
}

#[test]
fn test_config_clear() {
    let sandbox = Sandbox::new();
    sandbox.run_ok(&["config", "http", "10.0.0.5"]);
    sandbox.run_ok(&["config", "clear", "wifi"]);
    let json = sandbox.run_json(&["--json", "config", "show"]);
    assert_eq!(json["devices"]["http"]["isConfigured"], false);
}

#[test]
fn test_read_without_sensor_fails() {
    let output = Sandbox::new().run(&["read"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("No sensor configured"));
}

// =============================================================================
// Manual readings
// =============================================================================

#[test]
fn test_reading_add_and_list() {
    let sandbox = Sandbox::new();
    let id = sandbox.run_ok(&["reading", "add", "35.5", "--temperature", "27", "--notes", "after feeding"]);
    let id = id.trim().to_string();
    assert!(!id.is_empty());

    let json = sandbox.run_json(&["reading", "list", "--pending", "--format", "json"]);
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["id"], id.as_str());
    assert_eq!(entries[0]["turbidity"], 35.5);
    assert_eq!(entries[0]["notes"], "after feeding");
    assert_eq!(entries[0]["synced"], false);

    let text = sandbox.run_ok(&["reading", "list"]);
    assert!(text.contains("35.5"));
}

#[test]
fn test_reading_add_rejects_negative_turbidity() {
    let output = Sandbox::new().run(&["reading", "add", "--", "-4"]);
    assert!(!output.status.success());
}

#[test]
fn test_sync_without_api_fails() {
    let output = Sandbox::new().run(&["sync"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("No readings API configured"));
}

// =============================================================================
// Tanks
// =============================================================================

#[test]
fn test_tank_lifecycle() {
    let sandbox = Sandbox::new();
    sandbox.run_ok(&[
        "tank", "add", "Nursery", "--construction", "liner", "--fish-count", "200",
        "--average-weight", "250", "--area", "40",
    ]);

    let output = sandbox.run(&["tank", "add", "nursery"]);
    assert!(!output.status.success(), "duplicate names are rejected");

    let json = sandbox.run_json(&["tank", "list", "--format", "json"]);
    let tanks = json.as_array().unwrap();
    assert_eq!(tanks.len(), 1);
    assert_eq!(tanks[0]["name"], "Nursery");
    assert_eq!(tanks[0]["construction"], "liner");
    assert_eq!(tanks[0]["fishCount"], 200);

    sandbox.run_ok(&["tank", "remove", "nursery"]);
    let json = sandbox.run_json(&["tank", "list", "--format", "json"]);
    assert!(json.as_array().unwrap().is_empty());
}

#[test]
fn test_tank_bad_construction() {
    let output = Sandbox::new().run(&["tank", "add", "Pond", "--construction", "glass"]);
    assert!(!output.status.success());
}

// =============================================================================
// Offline auth
// =============================================================================

#[test]
fn test_auth_offline_flow() {
    let sandbox = Sandbox::new();
    let json = sandbox.run_json(&["auth", "status", "--offline", "--format", "json"]);
    assert_eq!(json["authRequired"], true);
    assert_eq!(json["decision"], "require-login");

    sandbox.run_ok(&[
        "auth", "login", "--id", "u1", "--name", "Ana", "--email", "ana@example.com",
    ]);
    let json = sandbox.run_json(&["auth", "status", "--offline", "--format", "json"]);
    assert_eq!(json["authRequired"], false);
    assert_eq!(json["user"]["email"], "ana@example.com");

    let json = sandbox.run_json(&["auth", "status", "--format", "json"]);
    assert_eq!(json["decision"], "defer-to-provider");
    assert_eq!(json["authRequired"], true);

    sandbox.run_ok(&["auth", "logout"]);
    let json = sandbox.run_json(&["auth", "status", "--offline", "--format", "json"]);
    assert_eq!(json["authRequired"], true);
    assert_eq!(json["hasEverLoggedIn"], true);
}

#[test]
fn test_dev_mode_skips_sign_in() {
    let sandbox = Sandbox::new();
    sandbox.run_ok(&["config", "set", "unauthenticated-dev-mode", "true"]);
    let json = sandbox.run_json(&["auth", "status", "--offline", "--format", "json"]);
    assert_eq!(json["authRequired"], false);
    assert_eq!(json["decision"], "allow");
}
