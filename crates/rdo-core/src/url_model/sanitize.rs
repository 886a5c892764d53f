//! Path component sanitization.

use crate::storage::TEMP_SUFFIX;

/// Longest single path component Linux accepts (NAME_MAX).
const NAME_MAX: usize = 255;

/// Room left for a collision suffix such as ` (12345)`.
const UNIQUE_SUFFIX_ROOM: usize = 8;

/// Longest sanitized component, so that `name (n).part` still fits NAME_MAX.
pub(crate) const MAX_COMPONENT: usize = NAME_MAX - TEMP_SUFFIX.len() - UNIQUE_SUFFIX_ROOM;

/// Makes one path component safe to create under the download root.
///
/// Separators, NUL and control characters become `_`, runs of `_` collapse,
/// leading/trailing dots and underscores are trimmed so `.` / `..` cannot
/// survive, and the result is cut to `MAX_COMPONENT` bytes on a char boundary.
/// May return an empty string; callers decide the fallback.
pub fn sanitize_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let unsafe_char = matches!(c, '\0' | '/' | '\\' | ' ' | '\t') || c.is_control();
        if unsafe_char || c == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut take = trimmed.len().min(MAX_COMPONENT);
    while !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    trimmed[..take].to_string()
}
