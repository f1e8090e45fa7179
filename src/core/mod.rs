//! Storage core: snapshot format, delta overlay, WAL, merged iteration, and
//! the compactor that folds one back into the other (spec.md §2–§4.4, §4.6).

pub mod compactor;
pub mod delta;
pub mod iter;
pub mod snapshot;
pub mod wal;

pub use delta::Delta;
pub use iter::{MergedEdgeIter, MergedView};
pub use snapshot::SnapshotData;
