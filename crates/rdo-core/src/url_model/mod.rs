//! URL validation and destination resolution.
//!
//! Everything here runs before a record exists: a submission that fails any
//! check is rejected and never reaches the ledger.

mod path;
mod sanitize;

pub use path::filename_from_url_path;
pub use sanitize::sanitize_component;

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use url::Url;

use crate::error::ValidationError;
use crate::storage;

/// Filename used when the URL path yields nothing usable.
pub const DEFAULT_FILENAME: &str = "download.bin";

/// Parses `raw` and checks it against the scheme allow-list.
///
/// Schemes compare case-insensitively (`Url` lowercases them on parse).
pub fn validate_url(raw: &str, allowed_schemes: &[String]) -> Result<Url, ValidationError> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|e| ValidationError::MalformedUrl {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    if !allowed_schemes
        .iter()
        .any(|s| s.eq_ignore_ascii_case(url.scheme()))
    {
        return Err(ValidationError::SchemeNotAllowed {
            url: trimmed.to_string(),
            scheme: url.scheme().to_string(),
        });
    }

    match url.host_str() {
        Some(h) if !h.is_empty() => Ok(url),
        _ => Err(ValidationError::MissingHost(trimmed.to_string())),
    }
}

/// Safe filename for `url`, falling back to [`DEFAULT_FILENAME`].
pub fn derive_filename(url: &Url) -> String {
    filename_from_url_path(url)
        .map(|raw| sanitize_component(&raw))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}

/// Resolves where a download lands, always strictly inside `root`.
///
/// A requested destination must be relative and free of `..`; each of its
/// components is sanitized. Without one, the name is derived from the URL.
pub fn resolve_destination(
    root: &Path,
    requested: Option<&Path>,
    url: &Url,
) -> Result<PathBuf, ValidationError> {
    let Some(requested) = requested else {
        return Ok(root.join(derive_filename(url)));
    };

    let mut relative = PathBuf::new();
    for component in requested.components() {
        match component {
            Component::Normal(part) => {
                let clean = sanitize_component(&part.to_string_lossy());
                if clean.is_empty() {
                    return Err(ValidationError::EmptyDestination(requested.to_path_buf()));
                }
                relative.push(clean);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ValidationError::PathTraversal(requested.to_path_buf()));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(ValidationError::EmptyDestination(requested.to_path_buf()));
    }
    Ok(root.join(relative))
}

/// Returns `candidate`, or `name (n).ext` with the smallest free `n`.
///
/// A path is taken when a live task owns it, or when it (or its `.part`)
/// already exists on disk, so completion never replaces an unrelated file.
pub fn unique_destination(candidate: PathBuf, taken: &HashSet<PathBuf>) -> PathBuf {
    let in_use = |p: &Path| taken.contains(p) || p.exists() || storage::temp_path(p).exists();
    if !in_use(&candidate) {
        return candidate;
    }
    let parent = candidate.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string());
    let ext = candidate
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1u32..)
        .map(|n| parent.join(format!("{stem} ({n}){ext}")))
        .find(|p| !in_use(p))
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http() -> Vec<String> {
        vec!["http".into(), "https".into()]
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn accepts_http_and_https() {
        assert!(validate_url("https://example.com/a.iso", &http()).is_ok());
        assert!(validate_url("  HTTP://example.com/a.iso ", &http()).is_ok());
    }

    #[test]
    fn rejects_malformed_and_disallowed() {
        assert!(matches!(
            validate_url("not a url", &http()),
            Err(ValidationError::MalformedUrl { .. })
        ));
        assert!(matches!(
            validate_url("ftp://example.com/a", &http()),
            Err(ValidationError::SchemeNotAllowed { scheme, .. }) if scheme == "ftp"
        ));
        assert!(matches!(
            validate_url("file:///etc/passwd", &["file".to_string()]),
            Err(ValidationError::MissingHost(_))
        ));
    }

    #[test]
    fn derived_destination() {
        let root = Path::new("/dl");
        assert_eq!(
            resolve_destination(root, None, &url("https://h/x/debian-12.iso")).unwrap(),
            PathBuf::from("/dl/debian-12.iso")
        );
        assert_eq!(
            resolve_destination(root, None, &url("https://h/")).unwrap(),
            PathBuf::from("/dl/download.bin")
        );
        assert_eq!(
            resolve_destination(root, None, &url("https://h/..")).unwrap(),
            PathBuf::from("/dl/download.bin")
        );
    }

    #[test]
    fn requested_destination_is_confined() {
        let root = Path::new("/dl");
        let u = url("https://h/a");
        assert_eq!(
            resolve_destination(root, Some(Path::new("./iso/a b.iso")), &u).unwrap(),
            PathBuf::from("/dl/iso/a_b.iso")
        );
        assert!(matches!(
            resolve_destination(root, Some(Path::new("../etc/passwd")), &u),
            Err(ValidationError::PathTraversal(_))
        ));
        assert!(matches!(
            resolve_destination(root, Some(Path::new("a/../../b")), &u),
            Err(ValidationError::PathTraversal(_))
        ));
        assert!(matches!(
            resolve_destination(root, Some(Path::new("/etc/passwd")), &u),
            Err(ValidationError::PathTraversal(_))
        ));
        assert!(matches!(
            resolve_destination(root, Some(Path::new(".")), &u),
            Err(ValidationError::EmptyDestination(_))
        ));
    }

    #[test]
    fn unique_destination_numbers_collisions() {
        let mut taken = HashSet::new();
        let p = PathBuf::from("/dl/a.iso");
        assert_eq!(unique_destination(p.clone(), &taken), p);
        taken.insert(p.clone());
        assert_eq!(unique_destination(p.clone(), &taken), PathBuf::from("/dl/a (1).iso"));
        taken.insert(PathBuf::from("/dl/a (1).iso"));
        assert_eq!(unique_destination(p, &taken), PathBuf::from("/dl/a (2).iso"));
        taken.insert(PathBuf::from("/dl/noext"));
        assert_eq!(
            unique_destination(PathBuf::from("/dl/noext"), &taken),
            PathBuf::from("/dl/noext (1)")
        );
    }

    #[test]
    fn unique_destination_skips_files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let taken = HashSet::new();
        let report = dir.path().join("report.pdf");
        std::fs::write(&report, b"keep me").unwrap();
        assert_eq!(
            unique_destination(report.clone(), &taken),
            dir.path().join("report (1).pdf")
        );

        // A stray partial file also claims its name.
        std::fs::write(dir.path().join("report (1).pdf.part"), b"x").unwrap();
        assert_eq!(
            unique_destination(report, &taken),
            dir.path().join("report (2).pdf")
        );
    }

    #[test]
    fn longest_url_name_fits_with_collision_suffix() {
        let long = format!("https://h.example/{}", "a".repeat(255));
        let dest = resolve_destination(Path::new("/dl"), None, &url(&long)).unwrap();
        let mut taken = HashSet::new();
        taken.insert(dest.clone());
        let numbered = unique_destination(dest, &taken);
        let name = storage::temp_path(&numbered);
        let name = name.file_name().unwrap().to_string_lossy();
        assert!(name.len() <= 255, "{}", name.len());
        assert!(name.ends_with(" (1).part"));
    }
}
