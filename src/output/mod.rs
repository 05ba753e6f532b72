//! Turns raw terminal captures into clean text or structured JSON.
//!
//! Every heuristic is a standalone pure function so each one can be audited
//! and tested on its own; `clean` only composes them.

mod ansi;
mod clean;
mod html;
mod json;

pub use ansi::strip_ansi;
pub use clean::{
    annotate_lines, clean, normalize_line_endings, strip_annotation, strip_command_echo,
    strip_leading_warnings, strip_shell_noise,
};
pub use html::{decode_entities, is_html_document, strip_html_wrapper, EMPTY_OBJECT_SENTINEL};
pub use json::{extract_json, extract_json_from_output, extract_json_lines};
