use super::session::{ReadStatus, RemoteShell, ShellOutput};
use crate::constants::markers::{JSON_FORMAT_FLAG, SUDO_PREFIX};
use crate::docker::probes::detect_permission_error;
use crate::errors::CommandFailure;
use crate::output::{extract_json, extract_json_lines, strip_annotation};
use crate::services::logger::Logger;
use crate::utils::text::preview;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const JSON_SUBCOMMANDS: [&str; 7] = ["inspect", "ls", "ps", "images", "info", "version", "stats"];
const MANAGEMENT_NOUNS: [&str; 10] = [
    "container", "image", "network", "volume", "system", "node", "service", "plugin", "context",
    "secret",
];

#[derive(Debug, Clone, Default)]
pub struct CommandInvocation {
    pub command: String,
    pub format_json: bool,
    pub use_sudo: bool,
    /// Re-run once with sudo when Docker reports a socket permission error.
    pub auto_sudo: bool,
    /// Output is payload (logs), so lines mentioning `error` are not failures.
    pub allow_error_lines: bool,
    pub timeout: Option<Duration>,
}

impl CommandInvocation {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn json(mut self) -> Self {
        self.format_json = true;
        self
    }

    pub fn sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    pub fn auto_sudo(mut self, auto_sudo: bool) -> Self {
        self.auto_sudo = auto_sudo;
        self
    }

    pub fn allow_error_lines(mut self) -> Self {
        self.allow_error_lines = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub raw_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandFailure>,
    pub used_sudo: bool,
}

impl CommandResult {
    fn succeeded(raw_text: String, json: Option<Value>) -> Self {
        Self {
            success: true,
            raw_text,
            json,
            error: None,
            used_sudo: false,
        }
    }

    fn failed(raw_text: String, failure: CommandFailure) -> Self {
        Self {
            success: false,
            raw_text,
            json: None,
            error: Some(failure),
            used_sudo: false,
        }
    }

    /// Turns a failed result into its tagged failure.
    pub fn into_result(self) -> Result<CommandResult, CommandFailure> {
        match self.error.clone() {
            Some(failure) => Err(failure),
            None => Ok(self),
        }
    }
}

/// Applies sudo and the Docker JSON format flag to a command.
pub fn build_command(command: &str, format_json: bool, use_sudo: bool) -> String {
    let trimmed = command.trim();
    let mut full = if use_sudo && !trimmed.starts_with(SUDO_PREFIX) {
        format!("{}{}", SUDO_PREFIX, trimmed)
    } else {
        trimmed.to_string()
    };
    if format_json && supports_json_format(trimmed) {
        full.push(' ');
        full.push_str(JSON_FORMAT_FLAG);
    }
    full
}

/// `docker <sub>` or `docker <noun> <sub>` where `<sub>` takes `--format`,
/// and no format flag is present yet.
fn supports_json_format(command: &str) -> bool {
    if command.contains("--format") {
        return false;
    }
    let tokens: Vec<&str> = command.split_whitespace().collect();
    let Some(docker_at) = tokens.iter().position(|token| *token == "docker") else {
        return false;
    };
    let mut words = tokens[docker_at + 1..]
        .iter()
        .filter(|token| !token.starts_with('-'));
    match words.next() {
        Some(first) if JSON_SUBCOMMANDS.contains(first) => true,
        Some(first) if MANAGEMENT_NOUNS.contains(first) => {
            words.next().is_some_and(|sub| JSON_SUBCOMMANDS.contains(sub))
        }
        _ => false,
    }
}

/// Maps one shell output to a command result.
///
/// Unless `allow_error_lines` is set, a line mentioning `error` wins over
/// any JSON in the output.
pub fn interpret(output: ShellOutput, format_json: bool, allow_error_lines: bool) -> CommandResult {
    let ShellOutput {
        text,
        status,
        elapsed,
    } = output;
    match status {
        ReadStatus::TimedOut | ReadStatus::NoResponse => {
            let failure = CommandFailure::Timeout(format!(
                "command did not finish within {} ms",
                elapsed.as_millis()
            ));
            return CommandResult::failed(text, failure);
        }
        ReadStatus::Cancelled => {
            return CommandResult::failed(
                text,
                CommandFailure::ConnectionFailure("command cancelled".to_string()),
            );
        }
        ReadStatus::Closed if text.trim().is_empty() => {
            return CommandResult::failed(
                text,
                CommandFailure::ConnectionFailure("channel closed without output".to_string()),
            );
        }
        _ => {}
    }

    // Raw-mode tags are ours, not the remote's: a `[ERROR] job failed` line
    // only counts if the remote text itself says "error".
    let error_line = if allow_error_lines {
        None
    } else {
        text.lines()
            .map(strip_annotation)
            .find(|line| line.to_lowercase().contains("error"))
            .map(|line| line.trim().to_string())
    };
    if let Some(line) = error_line {
        return CommandResult::failed(text, CommandFailure::RemoteError(line));
    }

    if !format_json {
        return CommandResult::succeeded(text, None);
    }
    if let Some(rows) = extract_json_lines(&text) {
        return CommandResult::succeeded(text, Some(Value::Array(rows)));
    }
    match extract_json(&text) {
        Ok(value) => CommandResult::succeeded(text, Some(value)),
        Err(err) => CommandResult::failed(text, CommandFailure::ParseFailure(err.to_string())),
    }
}

/// Builds, sends and interprets commands on an already acquired shell.
#[derive(Clone)]
pub struct CommandRunner {
    logger: Logger,
}

impl CommandRunner {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.child("runner"),
        }
    }

    pub fn run(
        &self,
        shell: &mut dyn RemoteShell,
        invocation: &CommandInvocation,
        cancel: &CancellationToken,
    ) -> CommandResult {
        let result = self.run_once(shell, invocation, invocation.use_sudo, cancel);
        if invocation.auto_sudo && !invocation.use_sudo && detect_permission_error(&result.raw_text)
        {
            self.logger.info(
                "Docker permission denied, retrying with sudo",
                Some(&serde_json::json!({
                    "target": shell.descriptor().key(),
                    "command": preview(&invocation.command),
                })),
            );
            let mut escalated = self.run_once(shell, invocation, true, cancel);
            escalated.used_sudo = true;
            return escalated;
        }
        result
    }

    fn run_once(
        &self,
        shell: &mut dyn RemoteShell,
        invocation: &CommandInvocation,
        use_sudo: bool,
        cancel: &CancellationToken,
    ) -> CommandResult {
        let command = build_command(&invocation.command, invocation.format_json, use_sudo);
        let output = shell.execute(&command, invocation.timeout, cancel);
        let mut result = interpret(output, invocation.format_json, invocation.allow_error_lines);
        result.used_sudo = use_sudo;
        if let Some(failure) = result.error.as_ref() {
            self.logger.debug(
                "Command failed",
                Some(&serde_json::json!({
                    "target": shell.descriptor().key(),
                    "command": preview(&command),
                    "failure": failure,
                })),
            );
        }
        result
    }
}
