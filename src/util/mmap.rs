//! Thin wrapper around `memmap2` so the rest of the crate depends on a
//! narrow interface rather than the mmap crate directly.

use crate::error::{RayError, Result};
use memmap2::Mmap as RawMmap;
use std::fs::File;
use std::path::Path;

/// A read-only memory-mapped file.
pub struct Mmap {
  inner: RawMmap,
}

impl Mmap {
  pub fn open(path: &Path) -> Result<Self> {
    let file = File::open(path).map_err(|e| RayError::io("mmap-open", path, e))?;
    // SAFETY: the snapshot file is never mutated while mapped; the store
    // holds the writer lock for the duration of any replace-and-rename.
    let inner = unsafe { RawMmap::map(&file) }.map_err(|e| RayError::io("mmap", path, e))?;
    Ok(Self { inner })
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.inner
  }

  pub fn len(&self) -> usize {
    self.inner.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.is_empty()
  }
}
