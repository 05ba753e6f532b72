use crate::constants::limits::{MAX_PORT, MIN_PORT};
use crate::errors::ToolError;
use serde_json::Value;
use std::time::Duration;

#[derive(Clone)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_string(
        &self,
        value: &Value,
        label: &str,
        trim: bool,
    ) -> Result<String, ToolError> {
        let text = value.as_str().ok_or_else(|| {
            ToolError::invalid_params(format!("{} must be a non-empty string", label))
        })?;
        let normalized = text.trim();
        if normalized.is_empty() {
            return Err(ToolError::invalid_params(format!(
                "{} must be a non-empty string",
                label
            )));
        }
        if normalized.contains('\0') {
            return Err(ToolError::invalid_params(format!(
                "{} must not contain null bytes",
                label
            )));
        }
        Ok(if trim {
            normalized.to_string()
        } else {
            text.to_string()
        })
    }

    pub fn ensure_optional_string(
        &self,
        value: Option<&Value>,
        label: &str,
        trim: bool,
    ) -> Result<Option<String>, ToolError> {
        match value {
            None => Ok(None),
            Some(val) if val.is_null() => Ok(None),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
            Some(val) => self.ensure_string(val, label, trim).map(Some),
        }
    }

    pub fn ensure_port(&self, value: Option<&Value>, fallback: u16) -> Result<u16, ToolError> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(fallback);
        };
        let numeric = value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
            .ok_or_else(port_error)?;
        if numeric < MIN_PORT as i64 || numeric > MAX_PORT as i64 {
            return Err(port_error());
        }
        Ok(numeric as u16)
    }

    pub fn ensure_optional_bool(
        &self,
        value: Option<&Value>,
        label: &str,
    ) -> Result<Option<bool>, ToolError> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(flag)) => Ok(Some(*flag)),
            Some(Value::String(text)) => match text.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(Some(true)),
                "0" | "false" | "no" => Ok(Some(false)),
                _ => Err(ToolError::invalid_params(format!(
                    "{} must be a boolean",
                    label
                ))),
            },
            Some(_) => Err(ToolError::invalid_params(format!(
                "{} must be a boolean",
                label
            ))),
        }
    }

    /// Reads a positive millisecond count (number or numeric string).
    pub fn ensure_optional_millis(
        &self,
        value: Option<&Value>,
        label: &str,
    ) -> Result<Option<Duration>, ToolError> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        let numeric = value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse::<u64>().ok()))
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ToolError::invalid_params(format!("{} must be a positive integer", label))
            })?;
        Ok(Some(Duration::from_millis(numeric)))
    }

    pub fn ensure_optional_count(
        &self,
        value: Option<&Value>,
        label: &str,
    ) -> Result<Option<u32>, ToolError> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                ToolError::invalid_params(format!("{} must be a non-negative integer", label))
            })
    }

    pub fn ensure_object<'a>(
        &self,
        value: Option<&'a Value>,
        label: &str,
    ) -> Result<&'a serde_json::Map<String, Value>, ToolError> {
        value
            .and_then(|v| v.as_object())
            .ok_or_else(|| ToolError::invalid_params(format!("{} must be an object", label)))
    }
}

impl Default for Validation {
    fn default() -> Self {
        Self::new()
    }
}

fn port_error() -> ToolError {
    ToolError::invalid_params(format!(
        "Port must be an integer between {} and {}",
        MIN_PORT, MAX_PORT
    ))
}
