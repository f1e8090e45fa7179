//! Leaf-level helpers shared by the storage core: binary encoding, CRC,
//! mmap, and the exclusive directory lock.

pub mod binary;
pub mod crc;
pub mod lock;
pub mod mmap;
