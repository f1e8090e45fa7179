//! Write-ahead log: append, rotation, fsync policy, and crash replay
//! (spec.md §3, §4.3).

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::{replay, ReplayOutcome};
pub use record::{RecordType, WalRecord};
pub use writer::{list_segments, segment_path, truncate_through, wal_dir, FsyncPolicy, WalWriter};
