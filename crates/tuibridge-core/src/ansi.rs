//! Terminal control-sequence stripping.
//!
//! Removes CSI, OSC, character-set selection and single-character escape
//! functions, plus C0/C1 control characters other than the line feed.
//! Carriage returns are dropped as well: in-place line rewrites are not
//! reproduced.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Longest escape-sequence tail that [`incomplete_escape_start`] will report.
/// Anything longer is treated as garbage rather than a sequence in flight.
pub const MAX_PENDING_ESCAPE: usize = 4096;

const ESC: char = '\x1b';

static CONTROL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        // CSI: ESC [ params intermediates final
        r"\x1b\[[0-?]*[ -/]*[@-~]",
        // OSC: ESC ] ... terminated by BEL or ST
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
        // character-set selection
        r"|\x1b[()*+#][0-9A-Za-z]",
        // single-character escape functions (ESC 7, ESC =, ESC M, ...)
        r"|\x1b[@-Z\\^_=>78c]",
        // C0 controls except LF, DEL, C1 controls
        r"|[\x00-\x09\x0b-\x1f\x7f-\x{9f}]",
    ))
    .expect("static regex is valid")
});

/// Strip terminal control sequences and control characters from `text`.
///
/// Total and idempotent. A truncated sequence is kept as literal text, minus
/// its ESC byte, which is itself a control character.
pub fn strip(text: &str) -> Cow<'_, str> {
    CONTROL_RE.replace_all(text, "")
}

/// Byte offset of an escape sequence at the end of `text` that has not been
/// terminated yet, if any.
///
/// Used by the chunk decoder to hold a sequence back until the rest of it
/// arrives. Returns `None` when the tail is complete, is not a recognised
/// sequence, or is longer than [`MAX_PENDING_ESCAPE`].
pub fn incomplete_escape_start(text: &str) -> Option<usize> {
    // An OSC body may end in the ESC of its own ST terminator, so it has to be
    // checked before looking at the last ESC in isolation.
    if let Some(osc) = text.rfind("\x1b]") {
        let body = &text[osc + 2..];
        let open = !body.contains('\x07')
            && match body.find(ESC) {
                None => true,
                Some(pos) => pos + 1 == body.len(),
            };
        if open {
            return (text.len() - osc <= MAX_PENDING_ESCAPE).then_some(osc);
        }
    }

    let start = text.rfind(ESC)?;
    let tail = &text.as_bytes()[start..];
    if tail.len() > MAX_PENDING_ESCAPE {
        return None;
    }
    let incomplete = match tail.get(1) {
        None => true,
        Some(b'[') => tail[2..].iter().all(|b| (0x20..=0x3f).contains(b)),
        Some(b'(' | b')' | b'*' | b'+' | b'#') => tail.len() == 2,
        Some(_) => false,
    };
    incomplete.then_some(start)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_sgr_colors() {
        assert_eq!(strip("\x1b[31mHello\x1b[0m\n"), "Hello\n");
    }

    #[test]
    fn strips_cursor_movement_and_private_modes() {
        assert_eq!(strip("\x1b[2K\x1b[1A\x1b[?25lok\x1b[?25h"), "ok");
    }

    #[test]
    fn strips_osc_with_bel_and_st() {
        assert_eq!(strip("\x1b]0;window title\x07body"), "body");
        assert_eq!(
            strip("\x1b]8;;https://example.com\x1b\\link\x1b]8;;\x1b\\"),
            "link"
        );
    }

    #[test]
    fn strips_charset_selection() {
        assert_eq!(strip("\x1b(Bplain\x1b)0"), "plain");
    }

    #[test]
    fn strips_single_character_escapes() {
        assert_eq!(strip("\x1b7saved\x1b8\x1b="), "saved");
    }

    #[test]
    fn removes_carriage_returns_and_keeps_newlines() {
        assert_eq!(strip("one\r\ntwo\rthree\n"), "one\ntwothree\n");
    }

    #[test]
    fn removes_raw_control_bytes() {
        assert_eq!(strip("a\x00b\x07c\x08d\x7fe"), "abcde");
    }

    #[test]
    fn truncated_sequence_is_literal_without_esc() {
        assert_eq!(strip("text\x1b[3"), "text[3");
        assert_eq!(strip("\x1b]0;unterminated"), "]0;unterminated");
    }

    #[test]
    fn leaves_unicode_text_alone() {
        assert_eq!(strip("✦ Hello ⠋ ── ümlaut"), "✦ Hello ⠋ ── ümlaut");
    }

    #[test]
    fn detects_incomplete_csi() {
        assert_eq!(incomplete_escape_start("abc\x1b"), Some(3));
        assert_eq!(incomplete_escape_start("abc\x1b["), Some(3));
        assert_eq!(incomplete_escape_start("abc\x1b[38;5"), Some(3));
        assert_eq!(incomplete_escape_start("abc\x1b[38;5m"), None);
    }

    #[test]
    fn detects_incomplete_osc() {
        assert_eq!(incomplete_escape_start("x\x1b]0;title"), Some(1));
        assert_eq!(incomplete_escape_start("x\x1b]0;title\x1b"), Some(1));
        assert_eq!(incomplete_escape_start("x\x1b]0;title\x07"), None);
        assert_eq!(incomplete_escape_start("x\x1b]0;title\x1b\\"), None);
    }

    #[test]
    fn detects_incomplete_charset() {
        assert_eq!(incomplete_escape_start("\x1b("), Some(0));
        assert_eq!(incomplete_escape_start("\x1b(B"), None);
    }

    #[test]
    fn complete_text_has_no_pending_escape() {
        assert_eq!(incomplete_escape_start("plain text"), None);
        assert_eq!(incomplete_escape_start("\x1b7"), None);
    }

    #[test]
    fn oversized_tail_is_not_held() {
        let text = format!("\x1b]{}", "a".repeat(MAX_PENDING_ESCAPE));
        assert_eq!(incomplete_escape_start(&text), None);
    }

    proptest! {
        #[test]
        fn strip_is_idempotent(input in "(\\PC|[\\x00-\\x1f\\x7f]|\x1b\\[[0-9;]{0,4}[a-zA-Z]?|\x1b\\][^\x07]{0,6}\x07?)*") {
            let once = strip(&input).into_owned();
            let twice = strip(&once).into_owned();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn strip_output_has_no_controls(input in any::<String>()) {
            let out = strip(&input);
            prop_assert!(out.chars().all(|c| c == '\n' || !c.is_control()));
        }
    }
}
