use crate::output::{clean, extract_json};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PERMISSION_DENIED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)permission denied.*docker\.sock|connect: permission denied|cannot connect to the docker daemon.*permission|dial unix.*: connect: permission denied",
    )
    .expect("permission regex")
});
static API_VERSION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)API version:\s+([0-9]+(?:\.[0-9]+)*)").expect("api regex"));
static DAEMON_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Error response from daemon: (.*)").expect("daemon error regex"));

static DOCKER_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"groups=.*\(docker\)").expect("docker group regex"));

pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

const NOT_RUNNING_MARKERS: [&str; 4] = [
    "cannot connect to the docker daemon",
    "error response from daemon",
    "permission denied",
    "docker daemon is not running",
];
const PS_HEADER_MARKERS: [&str; 4] = ["CONTAINER ID", "NAMES", "IMAGE", "STATUS"];
const INFO_SECTIONS: [&str; 4] = ["Containers:", "Images:", "Server Version:", "Storage Driver:"];

/// True when the output shows the Docker socket refused the current user.
pub fn detect_permission_error(output: &str) -> bool {
    !output.is_empty() && PERMISSION_DENIED.is_match(output)
}

/// Interprets `docker ps` output: a table header means the daemon answered.
pub fn is_docker_running(ps_output: &str) -> bool {
    let text = clean(ps_output, Some("docker ps"));
    let lower = text.to_lowercase();
    if NOT_RUNNING_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return false;
    }
    PS_HEADER_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Checks that text-mode `docker info` output is a real daemon report.
pub fn validate_docker_info(info_output: &str) -> Result<(), String> {
    if info_output.trim().is_empty() {
        return Err("Empty docker info output".to_string());
    }
    let text = clean(info_output, Some("docker info"));
    if text.contains("Cannot connect to the Docker daemon") {
        return Err("Cannot connect to Docker daemon".to_string());
    }
    if text.to_lowercase().contains("permission denied") {
        return Err("Permission denied accessing Docker".to_string());
    }
    if text.contains("Error response from daemon") {
        return Err(match DAEMON_ERROR.captures(&text) {
            Some(caps) => format!("Docker daemon error: {}", caps[1].trim()),
            None => "Unknown Docker daemon error".to_string(),
        });
    }
    if let Some(missing) = INFO_SECTIONS.iter().find(|section| !text.contains(*section)) {
        return Err(format!("Missing expected section: {}", missing));
    }
    Ok(())
}

/// Server API version from `docker version` output, JSON or text.
pub fn extract_api_version(version_output: &str) -> Option<String> {
    let text = clean(version_output, Some("docker version"));
    if let Ok(value) = extract_json(&text) {
        if let Some(version) = api_version_from_json(&value) {
            return Some(version);
        }
    }
    // Text output lists the client first; prefer the server block.
    let server_part = text.find("Server:").map(|at| &text[at..]);
    server_part
        .and_then(|part| API_VERSION_LINE.captures(part))
        .or_else(|| API_VERSION_LINE.captures(&text))
        .map(|caps| caps[1].to_string())
}

pub(crate) fn api_version_from_json(value: &Value) -> Option<String> {
    let server = value.get("Server")?;
    server
        .get("ApiVersion")
        .or_else(|| server.get("Engine").and_then(|engine| engine.get("ApiVersion")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Compares a `1.49` / `v1.49` style API version against `major.minor`.
pub fn api_version_at_least(version: &str, major: u32, minor: u32) -> bool {
    let version = version.trim().trim_start_matches('v');
    let mut parts = version.split('.');
    let parsed = (
        parts.next().and_then(|p| p.parse::<u32>().ok()),
        parts.next().and_then(|p| p.parse::<u32>().ok()),
    );
    match parsed {
        (Some(have_major), Some(have_minor)) => (have_major, have_minor) >= (major, minor),
        _ => false,
    }
}

/// True when `id` output lists `docker` among the user's groups.
pub fn in_docker_group(id_output: &str) -> bool {
    DOCKER_GROUP.is_match(id_output)
}

/// Shell steps that give `username` direct access to the Docker socket.
pub fn suggest_permission_fix(username: &str) -> String {
    [
        format!("# Fix Docker permissions for user {}", username),
        format!("sudo usermod -aG docker {}", username),
        String::new(),
        "# Restart Docker service".to_string(),
        "sudo systemctl restart docker".to_string(),
        String::new(),
        "# Verify permissions".to_string(),
        format!("id {}", username),
        format!("groups {}", username),
        String::new(),
        "# Log out and back in for the group change to apply, or run:".to_string(),
        "newgrp docker".to_string(),
    ]
    .join("\n")
}
