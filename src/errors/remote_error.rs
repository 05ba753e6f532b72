use serde::Serialize;
use thiserror::Error;

/// Why a session could not be established.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ConnectError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("connection timed out: {0}")]
    Timeout(String),
    #[error("host key rejected: {0}")]
    HostKey(String),
    #[error("private key could not be loaded: {0}")]
    KeyLoad(String),
    #[error("invalid connection descriptor: {0}")]
    InvalidDescriptor(String),
}

impl ConnectError {
    /// Failures that a fresh attempt cannot fix.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectError::Authentication(_)
                | ConnectError::HostKey(_)
                | ConnectError::KeyLoad(_)
                | ConnectError::InvalidDescriptor(_)
        )
    }
}

/// Tagged failure of a single command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum CommandFailure {
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("remote error: {0}")]
    RemoteError(String),
    #[error("parse failure: {0}")]
    ParseFailure(String),
}

impl CommandFailure {
    pub fn message(&self) -> &str {
        match self {
            CommandFailure::ConnectionFailure(msg)
            | CommandFailure::Timeout(msg)
            | CommandFailure::RemoteError(msg)
            | CommandFailure::ParseFailure(msg) => msg,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CommandFailure::ConnectionFailure(_) | CommandFailure::Timeout(_)
        )
    }
}

impl From<ConnectError> for CommandFailure {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::Timeout(msg) => CommandFailure::Timeout(msg),
            other => CommandFailure::ConnectionFailure(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
    #[error("empty input")]
    EmptyInput,
    #[error("invalid JSON format: {0}")]
    InvalidJson(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    #[error("operation failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
    #[error("connection rejected on attempt {attempt}: {error}")]
    Terminal { attempt: u32, error: ConnectError },
    #[error("operation failed on attempt {attempt}: {failure}")]
    Failed { attempt: u32, failure: CommandFailure },
    #[error("operation cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts } => {
                *attempts
            }
            RetryError::Terminal { attempt, .. } | RetryError::Failed { attempt, .. } => *attempt,
        }
    }
}
