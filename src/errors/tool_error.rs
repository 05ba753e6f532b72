use super::{CommandFailure, ConnectError, RetryError};
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidParams,
    Denied,
    NotFound,
    Timeout,
    Retryable,
    Remote,
    Parse,
    Cancelled,
    Internal,
}

/// Error surface of the JSON facade.
#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            retryable: matches!(kind, ToolErrorKind::Timeout | ToolErrorKind::Retryable),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidParams, "INVALID_PARAMS", message)
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Denied, "DENIED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, "NOT_FOUND", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Timeout, "TIMEOUT", message)
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Retryable, "RETRYABLE", message)
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Remote, "REMOTE_ERROR", message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Parse, "PARSE_FAILURE", message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Cancelled, "CANCELLED", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, "INTERNAL", message)
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ToolError {}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::internal(err.to_string())
    }
}

impl From<ConnectError> for ToolError {
    fn from(err: ConnectError) -> Self {
        let message = err.to_string();
        match err {
            ConnectError::Authentication(_) | ConnectError::HostKey(_) => {
                ToolError::denied(message)
                    .with_hint("Check the username, password or private key for this host.")
            }
            ConnectError::KeyLoad(_) | ConnectError::InvalidDescriptor(_) => {
                ToolError::invalid_params(message)
            }
            ConnectError::Timeout(_) => ToolError::timeout(message),
            ConnectError::Network(_) => ToolError::retryable(message),
        }
    }
}

impl From<CommandFailure> for ToolError {
    fn from(failure: CommandFailure) -> Self {
        let message = failure.message().to_string();
        match failure {
            CommandFailure::ConnectionFailure(_) => ToolError::retryable(message),
            CommandFailure::Timeout(_) => ToolError::timeout(message),
            CommandFailure::RemoteError(_) => ToolError::remote(message),
            CommandFailure::ParseFailure(_) => ToolError::parse(message),
        }
    }
}

impl From<RetryError> for ToolError {
    fn from(err: RetryError) -> Self {
        let attempts = err.attempts();
        let details = serde_json::json!({ "attempts": attempts });
        match err {
            RetryError::Exhausted { last_error, .. } => ToolError::retryable(format!(
                "Failed after {} attempts: {}",
                attempts, last_error
            ))
            .with_details(details),
            RetryError::Terminal { error, .. } => ToolError::from(error).with_details(details),
            RetryError::Failed { failure, .. } => ToolError::from(failure).with_details(details),
            RetryError::Cancelled { .. } => {
                ToolError::cancelled("Operation cancelled").with_details(details)
            }
        }
    }
}
