//! Logging helpers: keep remote console text on a single log line and keep
//! credentials out of the log entirely.

/// Longest preview of remote text that reaches the log.
const MAX_PREVIEW: usize = 300;

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///
/// Text longer than 300 characters is cut with an ellipsis.
pub fn escape_log(s: &str) -> String {
    escape_log_with_limit(s, MAX_PREVIEW)
}

/// Same as [`escape_log`] with a caller-chosen preview length.
pub fn escape_log_with_limit(s: &str, max_preview: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_preview) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= max_preview {
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

/// Mask a secret for display: keeps nothing but the length class.
pub fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

/// Shorten an identity for display as `first8...last8`.
pub fn short_identity(identity: &str) -> String {
    if identity.len() <= 16 || !identity.is_ascii() {
        return identity.to_string();
    }
    format!("{}...{}", &identity[..8], &identity[identity.len() - 8..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_newlines_and_tabs() {
        let esc = escape_log("0. Steve, abc\n1. Alex, def\r\tEnd");
        assert_eq!(esc, "0. Steve, abc\\n1. Alex, def\\r\\tEnd");
    }

    #[test]
    fn truncates_long_text() {
        let esc = escape_log_with_limit("abcdef", 3);
        assert_eq!(esc, "abc…");
    }

    #[test]
    fn redacts_secrets() {
        assert_eq!(redact("hunter2"), "<redacted>");
        assert_eq!(redact(""), "<empty>");
    }

    #[test]
    fn shortens_identity() {
        assert_eq!(
            short_identity("28838c3022e0cb886568abcaa6f37f8d"),
            "28838c30...a6f37f8d"
        );
        assert_eq!(short_identity("short"), "short");
    }
}
