//! Helpers for logging remote response bodies and ADIF snippets on one line.

/// Longest preview written to the log; the rest is replaced by `…`.
pub const MAX_PREVIEW: usize = 200;

/// Escape a string for single-line logging (`\n`, `\r`, `\t`, backslash and other
/// control characters) and cap it at [`MAX_PREVIEW`] characters.
pub fn escape_log(s: &str) -> String {
    escape_log_limited(s, MAX_PREVIEW)
}

pub fn escape_log_limited(s: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_chars) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= max_chars {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
