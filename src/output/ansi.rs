use once_cell::sync::Lazy;
use regex::Regex;

// OSC must come before the single-byte escapes: `]` sits inside the `\`-`_` range.
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\x1b(?:\][^\x07\x1b]*(?:\x07|\x1b\\)|\[[0-?]*[ -/]*[@-~]|[()][A-Za-z0-9]|[@-Z\\-_])",
    )
    .expect("ansi escape regex")
});

/// Removes ANSI/VT escape sequences: CSI (colors, cursor moves, `?2004h`
/// bracketed-paste toggles), OSC title updates and two-byte escapes.
///
/// Applied until nothing matches, so a removal can never splice a new
/// sequence together and the result is idempotent.
pub fn strip_ansi(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = ANSI_ESCAPE.replace_all(&current, "");
        if next.len() == current.len() {
            return current;
        }
        current = next.into_owned();
    }
}

#[cfg(test)]
mod tests {
    use super::strip_ansi;

    #[test]
    fn removes_color_codes() {
        assert_eq!(strip_ansi("\x1b[1;31mError\x1b[0m: boom"), "Error: boom");
    }

    #[test]
    fn removes_bracketed_paste_and_title_sequences() {
        let raw = "\x1b[?2004h\x1b]0;root@box: ~\x07root@box:~# ls\x1b[?2004l\r\n";
        assert_eq!(strip_ansi(raw), "root@box:~# ls\r\n");
    }

    #[test]
    fn removes_cursor_and_charset_sequences() {
        assert_eq!(strip_ansi("\x1b[2K\x1b[1Gdone\x1b(B\x1b="), "done");
    }

    #[test]
    fn is_idempotent_when_removal_splices_sequences() {
        let raw = "\x1b\x1b[0m[31mred";
        let once = strip_ansi(raw);
        assert_eq!(once, "red");
        assert_eq!(strip_ansi(&once), once);
    }

    #[test]
    fn leaves_plain_text_alone() {
        let plain = "CONTAINER ID   IMAGE   [x] {\"a\": 1}";
        assert_eq!(strip_ansi(plain), plain);
    }
}
