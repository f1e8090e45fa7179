//! WAL append path: length-prefixed records, segment rotation, fsync policy
//! (spec.md §4.3).

use crate::constants::{WAL_SEGMENT_EXT, WAL_DIR_NAME};
use crate::core::wal::record::WalRecord;
use crate::error::{RayError, Result};
use crate::util::crc::crc32_wal_record;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// When to fsync a commit's records to disk (spec.md §6 "walFsyncPolicy").
#[derive(Debug, Clone, Copy)]
pub enum FsyncPolicy {
  PerCommit,
  GroupCommit { window_ms: u64 },
  Never,
}

pub fn wal_dir(data_dir: &Path) -> PathBuf {
  data_dir.join(WAL_DIR_NAME)
}

pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
  dir.join(format!("{id:020}{WAL_SEGMENT_EXT}"))
}

/// Segment ids present in `dir`, ascending.
pub fn list_segments(dir: &Path) -> Result<Vec<u64>> {
  if !dir.exists() {
    return Ok(Vec::new());
  }
  let mut ids = Vec::new();
  for entry in fs::read_dir(dir).map_err(|e| RayError::io("read-dir", dir, e))? {
    let entry = entry.map_err(|e| RayError::io("read-dir-entry", dir, e))?;
    let name = entry.file_name();
    let name = name.to_string_lossy();
    if let Some(stem) = name.strip_suffix(WAL_SEGMENT_EXT) {
      if let Ok(id) = stem.parse::<u64>() {
        ids.push(id);
      }
    }
  }
  ids.sort_unstable();
  Ok(ids)
}

pub struct WalWriter {
  dir: PathBuf,
  segment_id: u64,
  file: File,
  size: u64,
  soft_cap: u64,
  policy: FsyncPolicy,
  /// Records appended since the last fsync, for group-commit batching.
  dirty: bool,
}

impl WalWriter {
  pub fn open(dir: &Path, soft_cap: u64, policy: FsyncPolicy) -> Result<Self> {
    fs::create_dir_all(dir).map_err(|e| RayError::io("mkdir", dir, e))?;
    let existing = list_segments(dir)?;
    let segment_id = existing.last().copied().unwrap_or(0);
    let path = segment_path(dir, segment_id);
    let file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&path)
      .map_err(|e| RayError::io("open", &path, e))?;
    let size = file.metadata().map_err(|e| RayError::io("stat", &path, e))?.len();
    Ok(Self {
      dir: dir.to_path_buf(),
      segment_id,
      file,
      size,
      soft_cap,
      policy,
      dirty: false,
    })
  }

  pub fn segment_id(&self) -> u64 {
    self.segment_id
  }

  /// Append one record. Returns without fsyncing unless `record` is a
  /// commit barrier and the policy calls for an immediate flush.
  pub fn append(&mut self, record: &WalRecord) -> Result<()> {
    let record_type = record.record_type() as u8;
    let payload = record.encode_payload();
    let crc = crc32_wal_record(record_type, &payload);
    let length = (1 + 4 + payload.len()) as u32;

    let mut frame = Vec::with_capacity(4 + length as usize);
    frame.extend_from_slice(&length.to_le_bytes());
    frame.push(record_type);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload);

    self
      .file
      .write_all(&frame)
      .map_err(|e| RayError::io("write", &self.current_path(), e))?;
    self.size += frame.len() as u64;
    self.dirty = true;

    if matches!(record, WalRecord::CommitBarrier { .. }) {
      match self.policy {
        FsyncPolicy::PerCommit => self.sync()?,
        FsyncPolicy::GroupCommit { .. } => {
          // The caller's commit loop is responsible for batching multiple
          // commits within the window before calling `sync`.
        }
        FsyncPolicy::Never => {}
      }
    }

    if self.size >= self.soft_cap {
      self.rotate()?;
    }
    Ok(())
  }

  pub fn sync(&mut self) -> Result<()> {
    if self.dirty {
      self
        .file
        .sync_all()
        .map_err(|e| RayError::io("fsync", &self.current_path(), e))?;
      self.dirty = false;
    }
    Ok(())
  }

  fn current_path(&self) -> PathBuf {
    segment_path(&self.dir, self.segment_id)
  }

  fn rotate(&mut self) -> Result<()> {
    self.sync()?;
    self.segment_id += 1;
    let path = self.current_path();
    self.file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&path)
      .map_err(|e| RayError::io("open", &path, e))?;
    self.size = 0;
    Ok(())
  }
}

/// Remove every segment file with id `<= through_segment`, called by the
/// compactor once the corresponding prefix is durably absorbed into a
/// snapshot (spec.md §4.4 step 7).
pub fn truncate_through(dir: &Path, through_segment: u64) -> Result<()> {
  for id in list_segments(dir)? {
    if id <= through_segment {
      let path = segment_path(dir, id);
      fs::remove_file(&path).map_err(|e| RayError::io("remove", &path, e))?;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn append_and_rotate() {
    let dir = tempdir().unwrap();
    let mut w = WalWriter::open(dir.path(), 30, FsyncPolicy::PerCommit).unwrap();
    w.append(&WalRecord::CreateNode { node_id: 1, key: None, labels: vec![] }).unwrap();
    w.append(&WalRecord::CommitBarrier { commit_ts: 1 }).unwrap();
    assert!(w.segment_id() >= 1, "small soft cap should trigger rotation");
  }

  #[test]
  fn truncate_removes_old_segments() {
    let dir = tempdir().unwrap();
    {
      let mut w = WalWriter::open(dir.path(), 1, FsyncPolicy::Never).unwrap();
      for i in 0..5u32 {
        w.append(&WalRecord::CreateNode { node_id: i, key: None, labels: vec![] }).unwrap();
        w.append(&WalRecord::CommitBarrier { commit_ts: i as u64 }).unwrap();
      }
    }
    let before = list_segments(dir.path()).unwrap();
    assert!(before.len() > 1);
    truncate_through(dir.path(), before[before.len() - 2]).unwrap();
    let after = list_segments(dir.path()).unwrap();
    assert_eq!(after, vec![*before.last().unwrap()]);
  }
}
