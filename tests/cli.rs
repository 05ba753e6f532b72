mod common;
use common::FakeConnector;

use clap::Parser;
use sshpool::cli::{run_with, CliArgs};
use sshpool::errors::ConnectError;
use sshpool::services::logger::Logger;
use std::sync::Arc;

fn args(extra: &[&str]) -> CliArgs {
    let mut argv = vec![
        "sshpool",
        "--hostname",
        "docker-01",
        "--username",
        "ops",
        "--password",
        "secret",
    ];
    argv.extend_from_slice(extra);
    CliArgs::parse_from(argv)
}

fn run(args: &CliArgs, connector: FakeConnector) -> (sshpool::cli::Summary, String) {
    let mut out = Vec::new();
    let summary =
        run_with(args, Arc::new(connector), Logger::new("test"), &mut out).expect("report");
    (summary, String::from_utf8(out).expect("utf8"))
}

#[test]
fn all_checks_pass_against_healthy_host() {
    let (summary, report) = run(&args(&[]), FakeConnector::docker_host());

    assert_eq!(summary.passed, 5, "{}", report);
    assert_eq!(summary.failed, 0, "{}", report);
    assert_eq!(summary.exit_code(), 0);
    assert!(report.contains("✓ Direct SSH connection successful"));
    assert!(report.contains("✓ Connection pooling works - reused existing connection"));
    assert!(report.contains("✓ Forced new connection created"));
    assert!(report.contains("  API Version: 1.49"));
    assert!(report.contains("  Container count: 2"));
    assert!(report.contains("Health status: online"));
    assert!(report.contains("✓ Invalid JSON properly detected"));
    assert!(report.contains("Tests passed: 5"));
}

#[test]
fn failed_connection_stops_the_run() {
    let connector = FakeConnector::docker_host()
        .failing_with(vec![ConnectError::Authentication("bad password".into())]);
    let (summary, report) = run(&args(&["--connection", "--pool"]), connector);

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.passed, 0);
    assert_eq!(summary.exit_code(), 1);
    assert!(report.contains("✗ Direct SSH connection failed"));
    assert!(!report.contains("Testing Connection Pooling"));
}

#[test]
fn only_selected_checks_run() {
    let (summary, report) = run(&args(&["--errors"]), FakeConnector::docker_host());

    assert_eq!(summary.passed, 1, "{}", report);
    assert!(report.contains("=== Testing Error Handling ==="));
    assert!(!report.contains("=== Testing Docker Commands ==="));
    assert!(report.contains("✓ Non-existent container detected as error"));
}

#[test]
fn buildkit_and_search_checks_run_on_request() {
    let connector = FakeConnector::docker_host();
    let (summary, report) = run(&args(&["--buildkit", "--search"]), connector);

    assert_eq!(summary.passed, 2, "{}", report);
    assert_eq!(summary.failed, 0, "{}", report);
    assert!(report.contains("=== Testing BuildKit Build Progress ==="));
    assert!(report.contains("  Stages: 3"));
    assert!(report.contains("✓ Registry search returned 2 results"));
    assert!(report.contains("  1. ubuntu - Stars: 17000"));
    assert!(!report.contains("=== Testing Basic Connectivity ==="));
}

#[test]
fn all_runs_the_api_and_permission_checks() {
    let (summary, report) = run(&args(&["--all"]), FakeConnector::docker_host());

    assert_eq!(summary.passed, 10, "{}", report);
    assert_eq!(summary.failed, 0, "{}", report);
    assert!(report.contains("✓ Found 1 multi-platform images"));
    assert!(report.contains("✓ Retrieved build info for image a1b2c3d4e5f6"));
    assert!(report.contains("  Architecture: amd64"));
    assert!(report.contains("✓ Direct Docker access allowed"));
    assert!(report.contains("API 1.49 features: 4/4"));
}

#[test]
fn denied_socket_prints_the_permission_fix() {
    let connector = FakeConnector::new(Arc::new(|command: &str| {
        if command.starts_with("sudo ") {
            return common::docker_host_output(command);
        }
        if command.starts_with("docker ") {
            return "Got permission denied while trying to connect to the Docker daemon socket at unix:///var/run/docker.sock".to_string();
        }
        if command == "id" {
            return "uid=1000(ops) gid=1000(ops) groups=1000(ops)".to_string();
        }
        common::docker_host_output(command)
    }));
    let (summary, report) = run(&args(&["--permissions", "--sudo"]), connector);

    assert_eq!(summary.passed, 1, "{}", report);
    assert!(report.contains("✓ Docker access requires sudo"));
    assert!(report.contains("sudo usermod -aG docker ops"));
}
