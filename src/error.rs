//! Error taxonomy for the storage and transaction core.

use crate::types::{PropKeyId, SectionId, Timestamp};
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, RayError>;

#[derive(Debug, thiserror::Error)]
pub enum RayError {
  #[error("corrupt section {section_id:?} at offset {offset}")]
  CorruptSection { section_id: SectionId, offset: u64 },

  #[error("corrupt WAL record in segment {segment} at offset {offset}")]
  CorruptWalRecord { segment: u64, offset: u64 },

  #[error("write conflict on key {key} (conflicting commit ts {conflicting_commit_ts})")]
  WriteConflict {
    key: String,
    conflicting_commit_ts: Timestamp,
  },

  #[error("not found")]
  NotFound,

  #[error("key already exists: {key}")]
  KeyExists { key: String },

  #[error("dimension mismatch: expected {expected}, got {got}")]
  DimensionMismatch { expected: usize, got: usize },

  #[error("vector index is not trained")]
  IndexNotTrained,

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("data directory already open by another process: {path}")]
  ResourceBusy { path: PathBuf },

  #[error("io error during {op} on {path}: {source}")]
  Io {
    op: &'static str,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("internal invariant violation: {0}")]
  Internal(String),

  #[error("no active transaction")]
  NoTransaction,

  #[error("database is read-only")]
  ReadOnly,

  #[error("a transaction is already in progress")]
  TransactionInProgress,

  #[error("property {prop_key_id} is vector-typed but dimensions are unset")]
  DimensionsUnset { prop_key_id: PropKeyId },
}

impl RayError {
  pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    RayError::Io {
      op,
      path: path.into(),
      source,
    }
  }
}
