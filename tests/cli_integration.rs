//! CLI integration tests for the decision-engine binary.

use std::path::Path;
use std::process::Command;

fn engine_bin(config: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_decision-engine"));
    cmd.arg("--config").arg(config).arg("--quiet");
    cmd
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let config = dir.join("engine.toml");
    std::fs::write(
        &config,
        format!(
            "[general]\ndatabase_path = \"{}\"\n\n[[categories]]\nlabel = \"Marketing\"\nmonthly_cap = 1000.0\n",
            dir.join("engine.db").display()
        ),
    )
    .unwrap();
    config
}

#[test]
fn test_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_decision-engine"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["sync", "submit", "list", "approve", "reject", "reclassify", "history", "clear"] {
        assert!(stdout.contains(command), "missing {}", command);
    }
}

#[test]
fn test_submit_then_list() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let output = engine_bin(&config)
        .arg("submit")
        .arg(r#"{"kind": "marketing", "description": "GOOGLE ADS abril", "amount": -1200.0, "date": "2025-04-02", "channel": "Google Ads"}"#)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Manual submission: 1 new decision records"));

    let output = engine_bin(&config)
        .args(["list", "--status", "pending"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1 decision records"));
    assert!(stdout.contains("Marketing"));
}

#[test]
fn test_invalid_entry_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let output = engine_bin(&config)
        .arg("submit")
        .arg(r#"{"kind": "commercial", "description": "Venda", "amount": 10, "date": "2025-01-01"}"#)
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
}

#[test]
fn test_clear_requires_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let output = engine_bin(&config)
        .arg("clear")
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());

    let output = engine_bin(&config)
        .args(["clear", "--yes"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Removed 0 decision records"));
}
