//! On-disk snapshot format: layout, writer, and mmap-backed reader (spec.md §6, §4.1).

pub mod format;
pub mod model;
pub mod reader;
pub mod writer;

pub use format::{parse_header_and_sections, section_bytes, SectionEntry, SnapshotHeader};
pub use model::{EdgeRecord, NodeRecord, SnapshotModel};
pub use reader::SnapshotData;
pub use writer::write_snapshot;
