use serde_json::Value;

use super::clean::clean;
use crate::errors::OutputError;

/// Pulls the first JSON document out of noisy text.
///
/// The whole trimmed input is tried first; failing that, each plausible
/// `{` / `[` opener is matched to its balanced closer (string and escape
/// aware) and the span is parsed. An opener that never closes and reads as
/// valid JSON up to the end of input means the payload was truncated, and no
/// partial inner object is returned for it.
pub fn extract_json(text: &str) -> Result<Value, OutputError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(OutputError::EmptyInput);
    }

    let direct_error = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    let bytes = trimmed.as_bytes();
    for start in 0..bytes.len() {
        if !is_plausible_opener(bytes, start) {
            continue;
        }
        match scan_balanced(bytes, start) {
            Span::Closed(end) => {
                if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..end]) {
                    return Ok(value);
                }
            }
            Span::Mismatched => {}
            // A valid document cut short ends the search; an opener that is
            // just noise (`[1/3`, `{"` in a log line) does not.
            Span::Unterminated => {
                if is_truncated_document(&trimmed[start..]) {
                    break;
                }
            }
        }
    }

    Err(OutputError::InvalidJson(direct_error.to_string()))
}

/// Parses line-delimited JSON objects (`docker ps --format '{{json .}}'`).
///
/// Returns `None` unless there are at least two non-empty lines and every
/// one of them is a JSON object; single documents go through
/// [`extract_json`].
pub fn extract_json_lines(text: &str) -> Option<Vec<Value>> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.len() < 2 {
        return None;
    }
    lines
        .into_iter()
        .map(|line| match serde_json::from_str::<Value>(line) {
            Ok(value @ Value::Object(_)) => Some(value),
            _ => None,
        })
        .collect()
}

/// Cleans a raw capture, then extracts JSON from what is left.
pub fn extract_json_from_output(text: &str, command: Option<&str>) -> Result<Value, OutputError> {
    extract_json(&clean(text, command))
}

enum Span {
    Closed(usize),
    Mismatched,
    Unterminated,
}

fn is_plausible_opener(bytes: &[u8], start: usize) -> bool {
    let opener = bytes[start];
    if opener != b'{' && opener != b'[' {
        return false;
    }
    let next = bytes[start + 1..]
        .iter()
        .copied()
        .find(|b| !b.is_ascii_whitespace());
    match (opener, next) {
        (b'{', Some(b'"' | b'}')) => true,
        (b'[', Some(b'{' | b'[' | b'"' | b']' | b'-' | b't' | b'f' | b'n')) => true,
        (b'[', Some(b)) => b.is_ascii_digit(),
        _ => false,
    }
}

/// Parsing runs out of input rather than hitting a syntax error.
fn is_truncated_document(tail: &str) -> bool {
    serde_json::from_str::<Value>(tail).is_err_and(|err| err.is_eof())
}

fn scan_balanced(bytes: &[u8], start: usize) -> Span {
    let mut expected: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => expected.push(b'}'),
            b'[' => expected.push(b']'),
            b'}' | b']' => {
                if expected.pop() != Some(b) {
                    return Span::Mismatched;
                }
                if expected.is_empty() {
                    return Span::Closed(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    Span::Unterminated
}
