use crate::constants::limits::MAX_CAPTURE_BYTES;
use crate::constants::network::{
    IDLE_THRESHOLD_MS, SSH_DEFAULT_PORT, TIMEOUT_SSH_COMMAND_MS, TIMEOUT_SSH_CONNECT_MS,
    TIMEOUT_SSH_PROBE_MS,
};
use crate::constants::retry::{MAX_RETRIES, RETRY_DELAY_MS};
use crate::errors::ToolError;
use crate::services::validation::Validation;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// How a session authenticates. Exactly one credential per descriptor.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    KeyMaterial(String),
    KeyFile(PathBuf),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(***)"),
            Credential::KeyMaterial(_) => f.write_str("KeyMaterial(***)"),
            Credential::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::KeyMaterial(_) => "private_key",
            Credential::KeyFile(_) => "key_file",
        }
    }
}

/// How the read loop decides a command has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Idle for the threshold and the output tail looks like a shell prompt.
    #[default]
    Prompt,
    /// A unique end marker echoed after the command has been seen.
    Sentinel,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub key_passphrase: Option<String>,
    pub minimal_terminal: bool,
    pub clean_output: bool,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub host_key_fingerprint: Option<String>,
    pub completion: CompletionMode,
    pub idle_threshold: Duration,
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("credential", &self.credential)
            .field(
                "key_passphrase",
                &self.key_passphrase.as_ref().map(|_| "***"),
            )
            .field("minimal_terminal", &self.minimal_terminal)
            .field("clean_output", &self.clean_output)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("retry_count", &self.retry_count)
            .field("retry_delay", &self.retry_delay)
            .field("host_key_fingerprint", &self.host_key_fingerprint)
            .field("completion", &self.completion)
            .field("idle_threshold", &self.idle_threshold)
            .finish()
    }
}

impl ConnectionDescriptor {
    pub fn new(host: impl Into<String>, username: impl Into<String>, credential: Credential) -> Self {
        Self {
            host: host.into(),
            port: SSH_DEFAULT_PORT,
            username: username.into(),
            credential,
            key_passphrase: None,
            minimal_terminal: true,
            clean_output: true,
            connect_timeout: resolve_connect_timeout(),
            command_timeout: resolve_command_timeout(),
            retry_count: MAX_RETRIES,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
            host_key_fingerprint: None,
            completion: CompletionMode::Prompt,
            idle_threshold: resolve_idle_threshold(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Pool key: `username@host:port`.
    pub fn key(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    /// True when a session opened for `other` behaves exactly like one
    /// opened for `self`. Retry and connect settings do not count.
    pub fn same_session(&self, other: &ConnectionDescriptor) -> bool {
        self.key() == other.key()
            && self.credential == other.credential
            && self.key_passphrase == other.key_passphrase
            && self.minimal_terminal == other.minimal_terminal
            && self.clean_output == other.clean_output
            && self.command_timeout == other.command_timeout
            && self.host_key_fingerprint == other.host_key_fingerprint
            && self.completion == other.completion
            && self.idle_threshold == other.idle_threshold
    }

    /// Builds a descriptor from the facade's `connection` object.
    pub fn from_value(value: &Value) -> Result<Self, ToolError> {
        let validation = Validation::new();
        let obj = validation.ensure_object(Some(value), "connection")?;

        let host = validation.ensure_string(
            obj.get("host").unwrap_or(&Value::Null),
            "connection.host",
            true,
        )?;
        let username = validation.ensure_string(
            obj.get("username")
                .or_else(|| obj.get("user"))
                .unwrap_or(&Value::Null),
            "connection.username",
            true,
        )?;
        let port = validation.ensure_port(obj.get("port"), SSH_DEFAULT_PORT)?;

        let private_key =
            validation.ensure_optional_string(obj.get("private_key"), "private_key", false)?;
        let key_file = validation.ensure_optional_string(
            obj.get("key_file").or_else(|| obj.get("key_filename")),
            "key_file",
            true,
        )?;
        let password =
            validation.ensure_optional_string(obj.get("password"), "password", false)?;
        let credential = match (private_key, key_file, password) {
            (Some(material), _, _) => Credential::KeyMaterial(material),
            (None, Some(path), _) => Credential::KeyFile(PathBuf::from(path)),
            (None, None, Some(password)) => Credential::Password(password),
            (None, None, None) => {
                return Err(ToolError::invalid_params("connection has no credential")
                    .with_hint("Provide one of: password, private_key, key_file."))
            }
        };

        let mut descriptor = Self::new(host, username, credential).with_port(port);
        descriptor.key_passphrase = validation.ensure_optional_string(
            obj.get("key_passphrase").or_else(|| obj.get("passphrase")),
            "key_passphrase",
            false,
        )?;
        if let Some(flag) =
            validation.ensure_optional_bool(obj.get("minimal_terminal"), "minimal_terminal")?
        {
            descriptor.minimal_terminal = flag;
        }
        if let Some(flag) =
            validation.ensure_optional_bool(obj.get("clean_output"), "clean_output")?
        {
            descriptor.clean_output = flag;
        }
        if let Some(timeout) =
            validation.ensure_optional_millis(obj.get("connect_timeout_ms"), "connect_timeout_ms")?
        {
            descriptor.connect_timeout = timeout;
        }
        if let Some(timeout) =
            validation.ensure_optional_millis(obj.get("command_timeout_ms"), "command_timeout_ms")?
        {
            descriptor.command_timeout = timeout;
        }
        if let Some(count) =
            validation.ensure_optional_count(obj.get("retry_count"), "retry_count")?
        {
            descriptor.retry_count = count;
        }
        if let Some(delay) =
            validation.ensure_optional_millis(obj.get("retry_delay_ms"), "retry_delay_ms")?
        {
            descriptor.retry_delay = delay;
        }
        if let Some(idle) =
            validation.ensure_optional_millis(obj.get("idle_threshold_ms"), "idle_threshold_ms")?
        {
            descriptor.idle_threshold = idle;
        }
        descriptor.host_key_fingerprint = validation
            .ensure_optional_string(
                obj.get("host_key_fingerprint"),
                "host_key_fingerprint",
                true,
            )?
            .map(|raw| normalize_fingerprint(&raw));
        if let Some(mode) = obj.get("completion").filter(|v| !v.is_null()) {
            descriptor.completion = serde_json::from_value(mode.clone()).map_err(|_| {
                ToolError::invalid_params("completion must be one of: prompt, sentinel")
            })?;
        }
        Ok(descriptor)
    }
}

impl<'de> Deserialize<'de> for ConnectionDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        ConnectionDescriptor::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// Canonical `SHA256:<base64 without padding>` form.
pub fn normalize_fingerprint(raw: &str) -> String {
    let cleaned = raw.trim().trim_end_matches('=');
    match cleaned.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("sha256:") => {
            format!("SHA256:{}", cleaned[7..].trim())
        }
        _ => format!("SHA256:{}", cleaned),
    }
}

fn resolve_millis(name: &str, fallback: u64) -> Duration {
    let millis = std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback);
    Duration::from_millis(millis)
}

pub fn resolve_connect_timeout() -> Duration {
    resolve_millis("SSHPOOL_CONNECT_TIMEOUT_MS", TIMEOUT_SSH_CONNECT_MS)
}

pub fn resolve_command_timeout() -> Duration {
    resolve_millis("SSHPOOL_COMMAND_TIMEOUT_MS", TIMEOUT_SSH_COMMAND_MS)
}

pub fn resolve_probe_timeout() -> Duration {
    resolve_millis("SSHPOOL_PROBE_TIMEOUT_MS", TIMEOUT_SSH_PROBE_MS)
}

pub fn resolve_idle_threshold() -> Duration {
    resolve_millis("SSHPOOL_IDLE_MS", IDLE_THRESHOLD_MS)
}

pub fn resolve_max_capture_bytes() -> usize {
    std::env::var("SSHPOOL_MAX_CAPTURE_BYTES")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(MAX_CAPTURE_BYTES)
}
