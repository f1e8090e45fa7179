//! CRC-32 helpers used by WAL records and snapshot section checksums.

pub fn crc32(bytes: &[u8]) -> u32 {
  crc32fast::hash(bytes)
}

/// CRC over `type || payload`, matching the WAL record format in spec.md §6.
pub fn crc32_wal_record(record_type: u8, payload: &[u8]) -> u32 {
  let mut hasher = crc32fast::Hasher::new();
  hasher.update(&[record_type]);
  hasher.update(payload);
  hasher.finalize()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn crc_is_deterministic() {
    assert_eq!(crc32(b"hello"), crc32(b"hello"));
    assert_ne!(crc32(b"hello"), crc32(b"hellp"));
  }
}
