//! Filename hint from the URL path.

use url::Url;

/// Returns the last non-empty path segment of `url`, if it is usable as a name.
pub fn filename_from_url_path(url: &Url) -> Option<String> {
    let segment = url
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()?;
    if segment == "." || segment == ".." {
        return None;
    }
    Some(segment.to_string())
}
