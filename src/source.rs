//! Diagram source preparation before encoding.

/// Applies the configured header and normalizes whitespace entities.
///
/// A non-empty `header` is prepended on its own line. HTML non-breaking
/// space entities (`&nbsp;`, any case) that leak in from rendered markdown
/// are turned back into spaces.
pub fn prepare(header: &str, raw: &str) -> String {
    let body = if header.is_empty() {
        raw.to_owned()
    } else {
        format!("{header}\r\n{raw}")
    };
    decode_nbsp(&body)
}

fn decode_nbsp(text: &str) -> String {
    const ENTITY: &str = "&nbsp;";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = find_ascii_case_insensitive(rest, ENTITY) {
        out.push_str(&rest[..pos]);
        out.push(' ');
        rest = &rest[pos + ENTITY.len()..];
    }
    out.push_str(rest);
    out
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}
