use super::features::{
    build_info_from_inspect, multiplatform_only, parse_buildkit_progress, shell_quote,
    BuildProgress, BuildRequest, SearchQuery,
};
use super::probes::{
    api_version_at_least, api_version_from_json, detect_permission_error, in_docker_group,
    is_docker_running, validate_docker_info, DOCKER_SOCKET,
};
use crate::constants::network::TIMEOUT_REACHABILITY_MS;
use crate::errors::{CommandFailure, OutputError};
use crate::services::logger::Logger;
use crate::ssh::retry::{HostStatus, ReachabilityCheck};
use crate::ssh::runner::{build_command, CommandInvocation, CommandResult, CommandRunner};
use crate::ssh::session::RemoteShell;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PERMISSION_PROBES: [(&str, &str); 6] = [
    ("version", "docker version"),
    ("info", "docker info"),
    ("ps", "docker ps"),
    ("images", "docker images"),
    ("networks", "docker network ls"),
    ("volumes", "docker volume ls"),
];

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub tail: u32,
    pub timestamps: bool,
    pub since: Option<String>,
    pub until: Option<String>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            tail: 100,
            timestamps: false,
            since: None,
            until: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionCheck {
    pub name: String,
    pub direct_access: bool,
    pub sudo_access: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionReport {
    pub direct_access_allowed: bool,
    pub sudo_access_allowed: bool,
    pub requires_sudo: bool,
    pub no_access: bool,
    pub commands: Vec<PermissionCheck>,
}

impl PermissionReport {
    fn summarize(commands: Vec<PermissionCheck>) -> Self {
        let direct = commands.iter().all(|check| check.direct_access);
        let sudo = commands
            .iter()
            .filter_map(|check| check.sudo_access)
            .all(|allowed| allowed);
        Self {
            direct_access_allowed: direct,
            sudo_access_allowed: sudo,
            requires_sudo: !direct && sudo,
            no_access: !direct && !sudo,
            commands,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SocketReport {
    pub socket_path: String,
    pub socket_details: String,
    pub docker_group: String,
    pub user_info: String,
    pub in_docker_group: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HostStatus,
    pub message: String,
    pub api_version: Option<String>,
    pub engine_version: Option<String>,
    pub api_1_49_supported: bool,
    pub details: Value,
    pub docker_access: bool,
    pub sudo_required: bool,
}

impl HealthReport {
    pub fn offline(message: impl Into<String>) -> Self {
        Self {
            status: HostStatus::Offline,
            message: message.into(),
            api_version: None,
            engine_version: None,
            api_1_49_supported: false,
            details: Value::Object(Map::new()),
            docker_access: false,
            sudo_required: false,
        }
    }
}

/// Docker operations over one acquired shell. Each call is a single
/// attempt; wrap it in a `RetryWrapper` run for retries.
#[derive(Clone)]
pub struct DockerOps {
    runner: CommandRunner,
    logger: Logger,
}

impl DockerOps {
    pub fn new(logger: Logger) -> Self {
        Self {
            runner: CommandRunner::new(logger.clone()),
            logger: logger.child("docker"),
        }
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    fn run(
        &self,
        shell: &mut dyn RemoteShell,
        invocation: CommandInvocation,
        cancel: &CancellationToken,
    ) -> CommandResult {
        self.runner.run(shell, &invocation, cancel)
    }

    /// `docker version` as JSON, falling back to the text report.
    pub fn version(
        &self,
        shell: &mut dyn RemoteShell,
        use_sudo: bool,
        cancel: &CancellationToken,
    ) -> Result<Value, CommandFailure> {
        let structured = self
            .run(shell, CommandInvocation::new("docker version").json().sudo(use_sudo), cancel)
            .into_result();
        match structured {
            Ok(CommandResult { json: Some(value), .. }) => return Ok(value),
            Ok(_) | Err(CommandFailure::ParseFailure(_)) => {}
            Err(failure) => return Err(failure),
        }
        self.logger.debug("docker version JSON unavailable, parsing text", None);
        let text = self
            .run(shell, CommandInvocation::new("docker version").sudo(use_sudo), cancel)
            .into_result()?;
        Ok(parse_indented_report(&text.raw_text))
    }

    /// `docker info` as JSON, falling back to the validated text report.
    pub fn info(
        &self,
        shell: &mut dyn RemoteShell,
        use_sudo: bool,
        cancel: &CancellationToken,
    ) -> Result<Value, CommandFailure> {
        let structured = self
            .run(shell, CommandInvocation::new("docker info").json().sudo(use_sudo), cancel)
            .into_result();
        match structured {
            Ok(CommandResult { json: Some(value @ Value::Object(_)), .. }) => return Ok(value),
            Ok(_) | Err(CommandFailure::ParseFailure(_)) => {}
            Err(failure) => return Err(failure),
        }
        self.logger.debug("docker info JSON unavailable, parsing text", None);
        let text = self
            .run(shell, CommandInvocation::new("docker info").sudo(use_sudo), cancel)
            .into_result()?;
        validate_docker_info(&text.raw_text).map_err(CommandFailure::RemoteError)?;
        Ok(parse_indented_report(&text.raw_text))
    }

    pub fn containers(
        &self,
        shell: &mut dyn RemoteShell,
        all: bool,
        use_sudo: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, CommandFailure> {
        let command = if all {
            "docker container ls --all"
        } else {
            "docker container ls"
        };
        let result = self.run(
            shell,
            CommandInvocation::new(command).json().sudo(use_sudo),
            cancel,
        );
        json_rows(result)
    }

    /// Local images whose listing reports a platform.
    pub fn multiplatform_images(
        &self,
        shell: &mut dyn RemoteShell,
        use_sudo: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, CommandFailure> {
        let result = self.run(
            shell,
            CommandInvocation::new("docker images").json().sudo(use_sudo),
            cancel,
        );
        Ok(multiplatform_only(json_rows(result)?))
    }

    /// `docker image inspect` reduced to build details.
    pub fn build_info(
        &self,
        shell: &mut dyn RemoteShell,
        image: &str,
        use_sudo: bool,
        cancel: &CancellationToken,
    ) -> Result<Value, CommandFailure> {
        let command = format!("docker image inspect {}", shell_quote(image));
        let result = self
            .run(shell, CommandInvocation::new(command).json().sudo(use_sudo), cancel)
            .into_result()?;
        match result.json {
            Some(inspect) => Ok(build_info_from_inspect(&inspect)),
            None => Err(CommandFailure::ParseFailure(
                "image inspect returned no JSON".to_string(),
            )),
        }
    }

    /// Registry search, one JSON object per result line. Lines that do not
    /// parse are skipped; a search with no rows and an error line fails.
    pub fn search_registry(
        &self,
        shell: &mut dyn RemoteShell,
        query: &SearchQuery,
        use_sudo: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, CommandFailure> {
        let result = self
            .run(
                shell,
                CommandInvocation::new(query.command())
                    .sudo(use_sudo)
                    .allow_error_lines(),
                cancel,
            )
            .into_result()?;
        let mut rows = Vec::new();
        let mut error_line = None;
        for line in result.raw_text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<Value>(line) {
                Ok(row @ Value::Object(_)) => rows.push(row),
                _ => {
                    if error_line.is_none() && line.to_lowercase().contains("error") {
                        error_line = Some(line.to_string());
                    }
                    self.logger.warn(
                        "Skipping unparseable search result",
                        Some(&serde_json::json!({ "line": line })),
                    );
                }
            }
        }
        match error_line {
            Some(line) if rows.is_empty() => Err(CommandFailure::RemoteError(line)),
            _ => Ok(rows),
        }
    }

    /// Runs a BuildKit build with plain progress and parses the stages.
    pub fn build_with_progress(
        &self,
        shell: &mut dyn RemoteShell,
        request: &BuildRequest,
        use_sudo: bool,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<BuildProgress, CommandFailure> {
        let result = self
            .run(
                shell,
                CommandInvocation::new(request.command())
                    .sudo(use_sudo)
                    .allow_error_lines()
                    .with_timeout(timeout),
                cancel,
            )
            .into_result()?;
        Ok(parse_buildkit_progress(&result.raw_text))
    }

    /// Socket mode and ownership, the `docker` group and the current user.
    pub fn socket_permissions(
        &self,
        shell: &mut dyn RemoteShell,
        cancel: &CancellationToken,
    ) -> SocketReport {
        let mut capture = |command: String| {
            self.run(&mut *shell, CommandInvocation::new(command).allow_error_lines(), cancel)
                .raw_text
                .trim()
                .to_string()
        };
        let socket_details = capture(format!("ls -l {}", DOCKER_SOCKET));
        let docker_group = capture("getent group docker".to_string());
        let user_info = capture("id".to_string());
        SocketReport {
            socket_path: DOCKER_SOCKET.to_string(),
            socket_details,
            docker_group,
            in_docker_group: in_docker_group(&user_info),
            user_info,
        }
    }

    pub fn logs(
        &self,
        shell: &mut dyn RemoteShell,
        container: &str,
        options: &LogOptions,
        use_sudo: bool,
        cancel: &CancellationToken,
    ) -> Result<String, CommandFailure> {
        let command = logs_command(container, options);
        let result = self
            .run(
                shell,
                CommandInvocation::new(command)
                    .sudo(use_sudo)
                    .allow_error_lines(),
                cancel,
            )
            .into_result()?;
        Ok(result.raw_text)
    }

    /// Runs the standard probe commands with and without sudo.
    pub fn check_permissions(
        &self,
        shell: &mut dyn RemoteShell,
        use_sudo: bool,
        cancel: &CancellationToken,
    ) -> PermissionReport {
        let mut commands = Vec::with_capacity(PERMISSION_PROBES.len());
        for (name, command) in PERMISSION_PROBES {
            let direct = self.run(
                shell,
                CommandInvocation::new(command).allow_error_lines(),
                cancel,
            );
            let direct_denied = detect_permission_error(&direct.raw_text);
            let sudo_access = if use_sudo || direct_denied {
                let escalated = self.run(
                    shell,
                    CommandInvocation::new(command).sudo(true).allow_error_lines(),
                    cancel,
                );
                Some(!detect_permission_error(&escalated.raw_text))
            } else {
                None
            };
            commands.push(PermissionCheck {
                name: name.to_string(),
                direct_access: !direct_denied,
                sudo_access,
            });
        }
        PermissionReport::summarize(commands)
    }

    /// `docker ps` answers, escalating to sudo on a permission error.
    pub fn is_reachable(
        &self,
        shell: &mut dyn RemoteShell,
        use_sudo: bool,
        cancel: &CancellationToken,
    ) -> bool {
        let result = self.run(
            shell,
            CommandInvocation::new("docker ps")
                .sudo(use_sudo)
                .auto_sudo(true)
                .allow_error_lines()
                .with_timeout(Some(Duration::from_millis(TIMEOUT_REACHABILITY_MS))),
            cancel,
        );
        is_docker_running(&result.raw_text)
    }

    /// Permissions, daemon reachability, version and info in one report.
    pub fn health(
        &self,
        shell: &mut dyn RemoteShell,
        use_sudo: bool,
        cancel: &CancellationToken,
    ) -> HealthReport {
        let permissions = self.check_permissions(shell, use_sudo, cancel);
        let use_sudo = use_sudo || permissions.requires_sudo;
        let mut report = HealthReport::offline("Docker daemon not accessible");
        report.docker_access = permissions.direct_access_allowed;
        report.sudo_required = permissions.requires_sudo;

        if !self.is_reachable(shell, use_sudo, cancel) {
            return report;
        }

        let version = match self.version(shell, use_sudo, cancel) {
            Ok(version) => version,
            Err(failure) => {
                self.logger.warn(
                    "docker version failed",
                    Some(&serde_json::json!({ "failure": failure })),
                );
                report.status = HostStatus::Degraded;
                report.message = "Docker is running but version info unavailable".to_string();
                return report;
            }
        };
        report.api_version = api_version_from_json(&version);
        report.engine_version = engine_version_from_json(&version);
        report.api_1_49_supported = report
            .api_version
            .as_deref()
            .is_some_and(|version| api_version_at_least(version, 1, 49));

        match self.info(shell, use_sudo, cancel) {
            Ok(details) => {
                report.details = details;
                report.status = HostStatus::Online;
                report.message = "Docker server is healthy".to_string();
            }
            Err(failure) => {
                self.logger.warn(
                    "docker info failed",
                    Some(&serde_json::json!({ "failure": failure })),
                );
                report.status = HostStatus::Degraded;
                report.message = "Docker is running but detailed info unavailable".to_string();
            }
        }
        report
    }
}

/// Reachability check for retried Docker operations: `docker ps` answers.
pub fn docker_reachability(use_sudo: bool) -> ReachabilityCheck {
    Arc::new(move |shell: &mut dyn RemoteShell, cancel: &CancellationToken| {
        let output = shell.execute(
            &build_command("docker ps", false, use_sudo),
            Some(Duration::from_millis(TIMEOUT_REACHABILITY_MS)),
            cancel,
        );
        if is_docker_running(&output.text) {
            Ok(())
        } else {
            Err("Docker daemon not accessible".to_string())
        }
    })
}

fn engine_version_from_json(value: &Value) -> Option<String> {
    let server = value.get("Server")?;
    server
        .get("Version")
        .or_else(|| server.get("Engine").and_then(|engine| engine.get("Version")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Rows from a JSON listing; no output at all means no rows.
fn json_rows(result: CommandResult) -> Result<Vec<Value>, CommandFailure> {
    match result.into_result() {
        Ok(CommandResult { json: Some(Value::Array(rows)), .. }) => Ok(rows),
        Ok(CommandResult { json: Some(row @ Value::Object(_)), .. }) => Ok(vec![row]),
        Ok(_) => Ok(Vec::new()),
        Err(CommandFailure::ParseFailure(msg)) if msg == OutputError::EmptyInput.to_string() => {
            Ok(Vec::new())
        }
        Err(failure) => Err(failure),
    }
}

pub(crate) fn logs_command(container: &str, options: &LogOptions) -> String {
    let mut command = format!("docker container logs --tail={}", options.tail);
    if options.timestamps {
        command.push_str(" --timestamps");
    }
    if let Some(since) = options.since.as_deref() {
        command.push_str(&format!(" --since={}", shell_quote(since)));
    }
    if let Some(until) = options.until.as_deref() {
        command.push_str(&format!(" --until={}", shell_quote(until)));
    }
    command.push(' ');
    command.push_str(&shell_quote(container));
    command
}

struct ReportNode {
    key: String,
    value: String,
    children: Vec<ReportNode>,
}

/// Parses indented `Key: value` reports (`docker info`, `docker version`)
/// into nested JSON. A key that has both a value and indented children keeps
/// its value under `Description`.
pub fn parse_indented_report(text: &str) -> Value {
    let mut roots: Vec<ReportNode> = Vec::new();
    let mut stack: Vec<(usize, ReportNode)> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        let indent = line.len() - line.trim_start().len();
        while stack.last().is_some_and(|(top, _)| *top >= indent) {
            if let Some((_, node)) = stack.pop() {
                attach(&mut stack, &mut roots, node);
            }
        }
        stack.push((
            indent,
            ReportNode {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
                children: Vec::new(),
            },
        ));
    }
    while let Some((_, node)) = stack.pop() {
        attach(&mut stack, &mut roots, node);
    }
    Value::Object(nodes_to_map(roots))
}

fn attach(stack: &mut [(usize, ReportNode)], roots: &mut Vec<ReportNode>, node: ReportNode) {
    match stack.last_mut() {
        Some((_, parent)) => parent.children.push(node),
        None => roots.push(node),
    }
}

fn nodes_to_map(nodes: Vec<ReportNode>) -> Map<String, Value> {
    let mut map = Map::new();
    for node in nodes {
        let value = if node.children.is_empty() {
            scalar(&node.value)
        } else {
            let mut children = nodes_to_map(node.children);
            if !node.value.is_empty() {
                children.insert("Description".to_string(), scalar(&node.value));
            }
            Value::Object(children)
        };
        map.insert(node.key, value);
    }
    map
}

fn scalar(raw: &str) -> Value {
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(number) = raw.parse::<u64>() {
            return Value::from(number);
        }
    }
    Value::String(raw.to_string())
}
