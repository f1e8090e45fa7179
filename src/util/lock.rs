//! Exclusive, process-wide lock on a data directory.
//!
//! Cross-process writers are prevented by an OS-level exclusive lock on a
//! `lock` file inside the data directory, held for the lifetime of the
//! open handle (spec.md §5).

use crate::error::{RayError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

pub struct DirLock {
  file: File,
  path: PathBuf,
}

impl DirLock {
  /// Acquire the exclusive lock, failing with `ResourceBusy` if another
  /// process already holds it.
  pub fn acquire(dir: &Path) -> Result<Self> {
    let path = dir.join(crate::constants::LOCK_FILE_NAME);
    let file = OpenOptions::new()
      .create(true)
      .write(true)
      .open(&path)
      .map_err(|e| RayError::io("lock-open", &path, e))?;

    file.try_lock_exclusive().map_err(|_| RayError::ResourceBusy {
      path: dir.to_path_buf(),
    })?;

    Ok(Self { file, path })
  }

  pub fn release(self) -> Result<()> {
    self
      .file
      .unlock()
      .map_err(|e| RayError::io("lock-release", &self.path, e))
  }
}
