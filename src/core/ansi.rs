//! Terminal styling removal for diagnostics leaving the worker

use regex::Regex;
use std::sync::OnceLock;

static ANSI_ESCAPE: OnceLock<Regex> = OnceLock::new();

fn ansi_escape() -> &'static Regex {
    ANSI_ESCAPE.get_or_init(|| {
        // CSI sequences (colors, cursor movement) and OSC sequences (hyperlinks)
        Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)")
            .expect("ANSI escape pattern is valid")
    })
}

/// Strip ANSI escape sequences from compiler or trace output
pub fn strip_ansi(text: &str) -> String {
    ansi_escape().replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_gcc_colors() {
        let raw = "\x1b[01m\x1b[Kmain.cpp:3:5:\x1b[m\x1b[K \x1b[01;31m\x1b[Kerror: \x1b[m\x1b[Kexpected ';'";
        assert_eq!(strip_ansi(raw), "main.cpp:3:5: error: expected ';'");
    }

    #[test]
    fn test_strips_hyperlinks() {
        let raw = "see \x1b]8;;https://example.com\x07docs\x1b]8;;\x07";
        assert_eq!(strip_ansi(raw), "see docs");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(strip_ansi("no styling here\n"), "no styling here\n");
    }
}
