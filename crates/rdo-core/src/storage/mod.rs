//! Partial-file lifecycle.
//!
//! A download is written to `<destination>.part` at explicit offsets, synced
//! per checkpoint, and renamed over the destination once complete.

mod digest;
mod writer;

pub use digest::sha256_hex;
pub use writer::PartFile;

use std::io;
use std::path::{Path, PathBuf};

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Delete the `.part` file for `final_path`. Returns false when there was none.
pub fn remove_partial(final_path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(temp_path(final_path)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_appends_part() {
        let p = temp_path(Path::new("file.iso"));
        assert_eq!(p.to_string_lossy(), "file.iso.part");
        let p2 = temp_path(Path::new("/tmp/archive.zip"));
        assert_eq!(p2.to_string_lossy(), "/tmp/archive.zip.part");
    }

    #[test]
    fn remove_partial_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.bin");
        std::fs::write(temp_path(&dest), b"abc").unwrap();
        assert!(remove_partial(&dest).unwrap());
        assert!(!remove_partial(&dest).unwrap());
    }
}
