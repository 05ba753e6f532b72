use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Returned in place of a full HTML document that leaked into a capture.
pub const EMPTY_OBJECT_SENTINEL: &str = "{}";

static DOCUMENT_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*<(?:!doctype\b|html[\s>])").expect("document regex"));
static PRE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<pre\b[^>]*>(.*?)</pre\s*>").expect("pre block regex"));
static KNOWN_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)</?(?:html|head|body|div|span|pre|code|p|br|b|i|u|font|strong|em|table|tr|td|th)\b[^<>]*/?>",
    )
    .expect("known tag regex")
});
static ANY_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[A-Za-z!][^<>]*>").expect("tag regex"));
static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z]{2,8});").expect("entity regex")
});

pub fn is_html_document(text: &str) -> bool {
    DOCUMENT_START.is_match(text)
}

/// Unwraps terminal output that arrived HTML-formatted (ansi2html style).
///
/// * a full document collapses to [`EMPTY_OBJECT_SENTINEL`];
/// * `<pre>` wrapped content is extracted, de-tagged and entity-decoded;
/// * fragments with recognizable markup are de-tagged;
/// * anything else is returned unchanged, so `a < b > c` survives.
pub fn strip_html_wrapper(text: &str) -> String {
    if is_html_document(text) {
        return EMPTY_OBJECT_SENTINEL.to_string();
    }

    let blocks: Vec<&str> = PRE_BLOCK
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if !blocks.is_empty() {
        return decode_entities(&ANY_TAG.replace_all(&blocks.join("\n"), ""));
    }

    if text.contains("ansi2html-content") || KNOWN_TAG.is_match(text) {
        return decode_entities(&ANY_TAG.replace_all(text, ""));
    }

    text.to_string()
}

/// Decodes the common named entities plus decimal and hex references.
/// Unknown names are left untouched.
pub fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body
                .strip_prefix("#x")
                .or_else(|| body.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(body)
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "copy" => '©',
        "reg" => '®',
        "hellip" => '…',
        "ndash" => '–',
        "mdash" => '—',
        _ => return None,
    };
    Some(ch)
}
