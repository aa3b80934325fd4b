//! Runs the `stackwatchd` binary against a registry of local TCP targets.

use std::io::Write;
use std::net::TcpListener;
use std::process::{Command, Output};

use tempfile::NamedTempFile;

fn stackwatchd(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stackwatchd"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run stackwatchd")
}

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Registry with one reachable and one unreachable TCP service.
fn registry(open_port: u16) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[monitor]
max_concurrent_probes = 4

[services.api]
check = "tcp"
host = "127.0.0.1"
port = {open_port}
timeout = "2s"
auto_restart = false

[services.db]
check = "tcp"
host = "127.0.0.1"
port = {closed}
timeout = "2s"
auto_restart = false
"#,
        closed = closed_port(),
    )
    .unwrap();
    file
}

#[test]
fn check_prints_json_report() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let file = registry(port);

    let out = stackwatchd(&["check", "--json", "--config", file.path().to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["services"]["api"]["status"], "healthy");
    assert_eq!(report["services"]["db"]["status"], "degraded");
    assert_eq!(report["services"]["db"]["consecutive_failures"], 1);
    assert_eq!(report["summary"]["total"], 2);
    assert_eq!(report["overall_status"], "degraded");
}

#[test]
fn check_prints_text_report() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let file = registry(listener.local_addr().unwrap().port());

    let out = stackwatchd(&["check", "--config", file.path().to_str().unwrap()]);
    assert!(out.status.success());

    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("api"));
    assert!(text.contains("└─ port"));
    assert!(text.contains("Overall Status: DEGRADED"));
}

#[test]
fn history_lists_probe_results() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let file = registry(listener.local_addr().unwrap().port());

    let out = stackwatchd(&[
        "history",
        "api",
        "--limit",
        "5",
        "--config",
        file.path().to_str().unwrap(),
    ]);
    assert!(out.status.success());

    let entries: Vec<serde_json::Value> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["outcome"], "success");
}

#[test]
fn history_of_unknown_service_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let file = registry(listener.local_addr().unwrap().port());

    let out = stackwatchd(&["history", "ghost", "--config", file.path().to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("ghost"));
}

#[test]
fn invalid_registry_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[services.web]
check = "smtp"
"#
    )
    .unwrap();

    let out = stackwatchd(&["check", "--config", file.path().to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("smtp"));
}
