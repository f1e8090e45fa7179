//! Magic numbers and constants for RayDB
//!
//! Ported from src/constants.ts

use crate::types::{NodeId, VectorId};

// ============================================================================
// Magic bytes (little-endian)
// ============================================================================

/// Snapshot magic: "RayDB format 1\0\0" (16 bytes, 8-byte aligned).
pub const MAGIC_SNAPSHOT: [u8; 16] = [
  0x52, 0x61, 0x79, 0x44, 0x42, 0x20, 0x66, 0x6f, // "RayDB fo"
  0x72, 0x6d, 0x61, 0x74, 0x20, 0x31, 0x00, 0x00, // "rmat 1\0\0"
];

pub const VERSION_SNAPSHOT: u32 = 1;
pub const MIN_READER_SNAPSHOT: u32 = 1;

// ============================================================================
// Header / section table layout (§6)
// ============================================================================

/// 16-byte magic + 4-byte version + 4-byte flags + 8-byte generation
/// + 8-byte total length + 8-byte section-table offset.
pub const SNAPSHOT_HEADER_SIZE: usize = 16 + 4 + 4 + 8 + 8 + 8;
/// 2-byte section id + 6-byte reserved + 8-byte offset + 8-byte length
/// + 8-byte checksum.
pub const SECTION_TABLE_ENTRY_SIZE: usize = 2 + 6 + 8 + 8 + 8;

// ============================================================================
// WAL
// ============================================================================

/// Default soft cap on a single WAL segment's size before rotation.
pub const DEFAULT_WAL_SEGMENT_SOFT_CAP: u64 = 64 * 1024 * 1024;
/// `u32 length || u8 type || u32 crc` prefix preceding every WAL record's payload.
pub const WAL_RECORD_PREFIX_SIZE: usize = 4 + 1 + 4;
pub const WAL_SEGMENT_EXT: &str = ".log";

// ============================================================================
// Data directory layout
// ============================================================================

pub const CURRENT_SNAPSHOT_NAME: &str = "current.bin";
pub const SNAPSHOT_FILE_PREFIX: &str = "snapshot.";
pub const SNAPSHOT_FILE_EXT: &str = ".bin";
pub const WAL_DIR_NAME: &str = "wal";
pub const LOCK_FILE_NAME: &str = "lock";

// ============================================================================
// Delta tuning
// ============================================================================

/// Upgrade an edge-patch list from a linear Vec scan to a HashSet lookup
/// past this many entries. A tuning knob, not a contract (spec.md §9.3).
pub const DELTA_SET_UPGRADE_THRESHOLD: usize = 64;

/// Delta ops accumulated before the compactor is recommended to run.
pub const DEFAULT_COMPACTION_TRIGGER_DELTA_OPS: usize = 10_000;

// ============================================================================
// MVCC defaults
// ============================================================================

pub const DEFAULT_MVCC_GC_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_MVCC_RETENTION_MS: u64 = 60_000;

// ============================================================================
// Vector store defaults
// ============================================================================

pub const DEFAULT_ROW_GROUP_SIZE: usize = 1024;
pub const DEFAULT_FRAGMENT_TARGET_SIZE: usize = 100_000;
/// Seal a sealed fragment's compaction candidacy once deletions exceed this ratio.
pub const DEFAULT_FRAGMENT_COMPACTION_DELETE_RATIO: f64 = 0.3;

// ============================================================================
// Initial ids (0 is reserved/null; ids start from 1)
// ============================================================================

pub const INITIAL_NODE_ID: NodeId = 1;
pub const INITIAL_LABEL_ID: u32 = 1;
pub const INITIAL_ETYPE_ID: u32 = 1;
pub const INITIAL_PROPKEY_ID: u32 = 1;
pub const INITIAL_TX_ID: u64 = 1;
pub const INITIAL_COMMIT_TS: u64 = 1;
pub const INITIAL_VECTOR_ID: VectorId = 1;

/// Snapshot generation starts at 0 (meaning "no snapshot yet").
pub const INITIAL_SNAPSHOT_GEN: u64 = 0;
