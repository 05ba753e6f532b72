use once_cell::sync::Lazy;
use regex::Regex;

use super::ansi::strip_ansi;
use super::html::{is_html_document, strip_html_wrapper, EMPTY_OBJECT_SENTINEL};

static PROMPT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:\[[\w.\-]+@[\w.\-]+[^\]]*\]|[\w.\-]+@[\w.\-]+(?::\S*)?|[\w.\-]*-\d+(?:\.\d+)*)?\s*[$#%>]\s*$",
    )
    .expect("prompt regex")
});
static BANNER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:last login:|\[sudo\] password for|password for \S+:)")
        .expect("banner regex")
});
static HEADER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z_]*[_,][A-Z_,]*$").expect("header regex"));

pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Drops the echoed command line and any `>` / `+` continuation lines
/// right after it. Text without the echo is returned unchanged.
pub fn strip_command_echo(text: &str, command: &str) -> String {
    let command = command.trim();
    if command.is_empty() {
        return text.to_string();
    }
    let lines: Vec<&str> = text.lines().collect();
    let Some(echo_at) = lines.iter().position(|line| line.contains(command)) else {
        return text.to_string();
    };

    let mut kept: Vec<&str> = lines[..echo_at].to_vec();
    let mut rest = lines[echo_at + 1..].iter().peekable();
    while let Some(line) = rest.peek() {
        if line.starts_with('>') || line.starts_with('+') {
            rest.next();
        } else {
            break;
        }
    }
    kept.extend(rest);
    kept.join("\n")
}

/// Removes shell prompts, login banners, sudo password prompts and bare
/// upper-case CSV headers such as `NAME,STATUS`.
pub fn strip_shell_noise(text: &str) -> String {
    text.lines()
        .filter(|line| {
            !(PROMPT_LINE.is_match(line)
                || BANNER_LINE.is_match(line)
                || HEADER_LINE.is_match(line.trim()))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Removes `WARNING:` lines (and blank lines) preceding the payload only.
pub fn strip_leading_warnings(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let first = lines
        .iter()
        .position(|line| {
            let line = line.trim_start();
            !line.is_empty() && !line.starts_with("WARNING:")
        })
        .unwrap_or(lines.len());
    lines[first..].join("\n")
}

/// Full cleanup pipeline for a raw terminal capture.
///
/// Escapes are stripped before anything else so every later heuristic sees
/// plain text. An HTML document short-circuits to `{}`.
pub fn clean(text: &str, command: Option<&str>) -> String {
    if text.is_empty() {
        return String::new();
    }
    let text = normalize_line_endings(&strip_ansi(text)).replace('\0', "");
    if is_html_document(&text) {
        return EMPTY_OBJECT_SENTINEL.to_string();
    }
    let text = strip_html_wrapper(&text);
    let text = match command {
        Some(command) => strip_command_echo(&text, command),
        None => text,
    };
    let text = strip_shell_noise(&text);
    strip_leading_warnings(&text).trim().to_string()
}

const ERROR_TAG: &str = "[ERROR] ";
const SUCCESS_TAG: &str = "[SUCCESS] ";

/// Marks lines for human readers when output cleanup is disabled.
pub fn annotate_lines(text: &str) -> String {
    text.lines()
        .map(|line| {
            let lower = line.to_lowercase();
            if lower.contains("error") || lower.contains("failed") || lower.contains("exception")
            {
                format!("{}{}", ERROR_TAG, line)
            } else if lower.contains("success") || lower.contains("completed") {
                format!("{}{}", SUCCESS_TAG, line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// The line as the remote printed it, without an [`annotate_lines`] tag.
pub fn strip_annotation(line: &str) -> &str {
    line.strip_prefix(ERROR_TAG)
        .or_else(|| line.strip_prefix(SUCCESS_TAG))
        .unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_echo_and_continuations() {
        let text = "docker ps \\\n> --all\nCONTAINER ID\nabc";
        assert_eq!(strip_command_echo(text, "docker ps"), "CONTAINER ID\nabc");
    }

    #[test]
    fn leaves_text_without_echo() {
        assert_eq!(strip_command_echo("hello\nworld", "uptime"), "hello\nworld");
    }

    #[test]
    fn removes_prompts_banners_and_headers() {
        let text = "Last login: Mon Oct 12 10:00 from 10.0.0.2\n\
root@web-1:~# \n\
[deploy@db-2 app]$\n\
bash-5.1$\n\
NAME,STATUS\n\
web,Up 2 hours\n\
CONTAINER ID   IMAGE";
        assert_eq!(
            strip_shell_noise(text),
            "web,Up 2 hours\nCONTAINER ID   IMAGE"
        );
    }

    #[test]
    fn only_leading_warnings_are_dropped() {
        let text = "WARNING: No swap limit support\n\n{\"a\":1}\nWARNING: later";
        assert_eq!(strip_leading_warnings(text), "{\"a\":1}\nWARNING: later");
    }

    #[test]
    fn clean_runs_the_whole_pipeline() {
        let raw = "\x1b[?2004hroot@host:~# docker info --format '{{json .}}'\r\n\
WARNING: bridge-nf-call-iptables is disabled\r\n\
{\"ServerVersion\":\"24.0.7\"}\r\n\
root@host:~# ";
        assert_eq!(
            clean(raw, Some("docker info --format '{{json .}}'")),
            "{\"ServerVersion\":\"24.0.7\"}"
        );
    }

    #[test]
    fn clean_collapses_html_documents() {
        assert_eq!(clean("<!DOCTYPE html><html></html>", None), "{}");
        assert_eq!(clean("", Some("ls")), "");
    }

    #[test]
    fn annotate_marks_errors_and_successes() {
        assert_eq!(
            annotate_lines("build completed\nError: disk full\nplain\n"),
            "[SUCCESS] build completed\n[ERROR] Error: disk full\nplain"
        );
    }

    #[test]
    fn annotation_tags_come_back_off() {
        let annotated = annotate_lines("job failed\nall good\nsync completed");
        let original: Vec<&str> = annotated.lines().map(strip_annotation).collect();
        assert_eq!(original, vec!["job failed", "all good", "sync completed"]);
        assert_eq!(strip_annotation("[ERROR]no space"), "[ERROR]no space");
    }
}
