use crate::constants::limits::LOG_PREVIEW_BYTES;

pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> String {
    if max_bytes == 0 {
        return String::new();
    }
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Single-line preview of captured output for log metadata.
pub fn preview(value: &str) -> String {
    let flattened = value.replace(['\r', '\n'], " ");
    let cut = truncate_utf8_prefix(flattened.trim(), LOG_PREVIEW_BYTES);
    if cut.len() < flattened.trim().len() {
        format!("{}...", cut)
    } else {
        cut
    }
}
