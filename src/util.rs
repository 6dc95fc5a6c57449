// ABOUTME: Utility functions for slugging, truncation and file naming
// ABOUTME: Provides consistent, filesystem-safe artifact names

pub const TITLE_SLUG_CHARS: usize = 50;

/// Transliteration can grow a title many times over; this keeps names under NAME_MAX.
pub const SLUG_MAX_BYTES: usize = 100;

pub fn slugify(text: &str) -> String {
    slug::slugify(text)
}


/// First `max_chars` characters of `s`, never splitting a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Shortens response bodies for error messages.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    let flat = s.trim().replace(['\n', '\r'], " ");
    let cut = truncate_chars(&flat, max_chars);
    if cut.len() < flat.len() {
        format!("{}...", cut)
    } else {
        flat
    }
}

/// First `max_bytes` bytes of `s`, backed off to a char boundary.
pub fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// `{id}_{slug}.md`. The title is cut to 50 chars, then the slug to 100 bytes.
pub fn artifact_filename(id: &str, title: &str) -> String {
    let slug = slugify(truncate_chars(title, TITLE_SLUG_CHARS));
    let slug = truncate_bytes(&slug, SLUG_MAX_BYTES).trim_end_matches('-');
    let slug = if slug.is_empty() { "untitled" } else { slug };
    let safe_id: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    format!("{}_{}.md", safe_id, slug)
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
