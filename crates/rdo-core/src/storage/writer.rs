use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(unix)]
use std::os::unix::fs::FileExt;

use super::temp_path;

/// Open `.part` file of one download. Cheap to clone so writes can be moved
/// onto the blocking pool.
#[derive(Clone)]
pub struct PartFile {
    file: Arc<File>,
    path: PathBuf,
}

impl PartFile {
    /// Open (creating if missing) the part file for `final_path`, positioned
    /// for a resume from `checkpoint`.
    ///
    /// Bytes past the checkpoint were never acknowledged and are cut off.
    /// Returns the offset the transfer must resume from: the checkpoint, or
    /// the on-disk length when the file is shorter than the checkpoint.
    pub fn open_resume(final_path: &Path, checkpoint: u64) -> io::Result<(Self, u64)> {
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let path = temp_path(final_path);
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let on_disk = file.metadata()?.len();
        if on_disk > checkpoint {
            file.set_len(checkpoint)?;
        }
        let resume_at = on_disk.min(checkpoint);
        Ok((
            PartFile {
                file: Arc::new(file),
                path,
            },
            resume_at,
        ))
    }

    /// Write all of `data` at `offset`.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = (*self.file).try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)
    }

    /// Flush written data to disk; a checkpoint may only be recorded after this.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_data()
    }

    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename the part file over `final_path`. Call `sync` first.
    pub fn finalize(self, final_path: &Path) -> io::Result<()> {
        let path = self.path.clone();
        drop(self.file);
        std::fs::rename(&path, final_path)
    }
}
