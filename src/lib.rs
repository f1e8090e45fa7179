//! RayDB — an embedded graph database storage and transaction core.
//!
//! RayDB uses a **snapshot + delta + WAL** architecture:
//!
//! - **Snapshot**: a memory-mapped CSR (compressed sparse row) file for
//!   fast, zero-copy reads.
//! - **Delta**: an in-memory overlay holding writes made since the last
//!   snapshot.
//! - **WAL**: a write-ahead log giving durability and crash recovery.
//!
//! On top of that sit optional MVCC (snapshot-isolated transactions with
//! first-writer-wins conflict detection) and an IVF vector index for
//! approximate nearest-neighbor search over node properties.
//!
//! The public surface lives on [`graph::GraphDB`]; open one with
//! [`graph::OpenOptions`] and begin transactions with [`graph::Tx`].

#![deny(clippy::all)]
#![allow(dead_code)]

pub mod check;
pub mod constants;
pub mod core;
pub mod error;
pub mod graph;
pub mod mvcc;
pub mod types;
pub mod util;
pub mod vector;

pub use error::{RayError, Result};
pub use graph::{DbConfig, GraphDB, OpenOptions, Tx};
