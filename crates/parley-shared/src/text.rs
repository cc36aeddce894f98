//! Message body normalisation.
//!
//! Bodies are trimmed and escaped so they are safe to render verbatim in a
//! markup-based UI, then length-checked as stored.

use crate::constants::MAX_TEXT_LEN;
use crate::error::ProtocolError;

/// Validate and normalise a message body.
///
/// Returns the escaped body (possibly empty when an attachment carries the
/// message). The length bound applies to the escaped text, so the stored
/// body never exceeds [`MAX_TEXT_LEN`] characters.
pub fn prepare_body(text: Option<&str>, has_attachment: bool) -> Result<String, ProtocolError> {
    let trimmed = text.map(str::trim).unwrap_or("");

    if trimmed.is_empty() && !has_attachment {
        return Err(ProtocolError::EmptyMessage);
    }

    let body = escape(trimmed);
    let len = body.chars().count();
    if len > MAX_TEXT_LEN {
        return Err(ProtocolError::TooLong {
            len,
            max: MAX_TEXT_LEN,
        });
    }

    Ok(body)
}

/// Escape markup-significant and control characters.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            '\\' => out.push_str("&#x5C;"),
            '`' => out.push_str("&#96;"),
            '\n' | '\t' => out.push(c),
            c if c.is_control() => out.extend(c.escape_unicode()),
            c => out.push(c),
        }
    }
    out
}

/// Shorten a body for list previews without splitting a character.
pub fn truncate_preview(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
