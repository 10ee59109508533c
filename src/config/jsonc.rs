//! Line-comment stripping for `.jsonc` settings documents.
//!
//! Everything from a `//` marker to the end of its line is removed, but only
//! when the marker sits outside a string literal. A value such as
//! `"smtp_server": "mail//relay"` therefore survives intact. Block comments
//! (`/* */`) are not supported.

/// Returns `input` with all `//` line comments removed.
///
/// Line structure is preserved so `serde_json` error positions still point at
/// the right line of the original file.
#[must_use]
pub fn strip_line_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());

    for (i, line) in input.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        match comment_start(line) {
            Some(pos) => out.push_str(line[..pos].trim_end()),
            None => out.push_str(line),
        }
    }

    out
}

/// Byte offset of the first `//` outside a string literal, if any.
fn comment_start(line: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'/' if bytes.get(i + 1) == Some(&b'/') => return Some(i),
            _ => {}
        }
    }

    None
}
