//! Binary layout of the snapshot file (spec.md §6).

use crate::constants::*;
use crate::error::{RayError, Result};
use crate::types::SectionId;
use crate::util::binary::{read_u32_at, read_u64_at};

/// One entry in the section table.
#[derive(Debug, Clone, Copy)]
pub struct SectionEntry {
  pub section_id: SectionId,
  pub offset: u64,
  pub length: u64,
  pub checksum: u64,
}

#[derive(Debug, Clone)]
pub struct SnapshotHeader {
  pub version: u32,
  pub flags: u32,
  pub generation: u64,
  pub total_length: u64,
  pub section_table_offset: u64,
  pub num_sections: u16,
}

/// Parse the fixed header and section table out of a raw snapshot byte
/// slice. Never panics on truncated input: every access is bounds-checked
/// and failures surface as `CorruptSection`.
pub fn parse_header_and_sections(bytes: &[u8]) -> Result<(SnapshotHeader, Vec<SectionEntry>)> {
  if bytes.len() < SNAPSHOT_HEADER_SIZE {
    return Err(RayError::CorruptSection {
      section_id: SectionId::Header,
      offset: 0,
    });
  }
  if bytes[0..16] != MAGIC_SNAPSHOT {
    return Err(RayError::CorruptSection {
      section_id: SectionId::Header,
      offset: 0,
    });
  }

  let version = read_u32_at(bytes, 16).map_err(|_| RayError::CorruptSection {
    section_id: SectionId::Header,
    offset: 16,
  })?;
  if version < MIN_READER_SNAPSHOT {
    return Err(RayError::CorruptSection {
      section_id: SectionId::Header,
      offset: 16,
    });
  }
  let flags = read_u32_at(bytes, 20).map_err(|_| RayError::CorruptSection {
    section_id: SectionId::Header,
    offset: 20,
  })?;
  let generation = read_u64_at(bytes, 24).map_err(|_| RayError::CorruptSection {
    section_id: SectionId::Header,
    offset: 24,
  })?;
  let total_length = read_u64_at(bytes, 32).map_err(|_| RayError::CorruptSection {
    section_id: SectionId::Header,
    offset: 32,
  })?;
  let section_table_offset = read_u64_at(bytes, 40).map_err(|_| RayError::CorruptSection {
    section_id: SectionId::Header,
    offset: 40,
  })?;

  let table_start = section_table_offset as usize;
  if table_start + 2 > bytes.len() {
    return Err(RayError::CorruptSection {
      section_id: SectionId::Header,
      offset: section_table_offset,
    });
  }
  let num_sections = read_u32_at(bytes, table_start).map_err(|_| RayError::CorruptSection {
    section_id: SectionId::Header,
    offset: section_table_offset,
  })? as u16;

  let mut sections = Vec::with_capacity(num_sections as usize);
  let mut cursor = table_start + 4;
  for i in 0..num_sections {
    if cursor + SECTION_TABLE_ENTRY_SIZE > bytes.len() {
      return Err(RayError::CorruptSection {
        section_id: SectionId::Header,
        offset: cursor as u64,
      });
    }
    let id_raw = u16::from_le_bytes([bytes[cursor], bytes[cursor + 1]]);
    let section_id = SectionId::from_u16(id_raw).unwrap_or(SectionId::Header);
    let offset = read_u64_at(bytes, cursor + 8).map_err(|_| RayError::CorruptSection {
      section_id,
      offset: cursor as u64,
    })?;
    let length = read_u64_at(bytes, cursor + 16).map_err(|_| RayError::CorruptSection {
      section_id,
      offset: cursor as u64,
    })?;
    let checksum = read_u64_at(bytes, cursor + 24).map_err(|_| RayError::CorruptSection {
      section_id,
      offset: cursor as u64,
    })?;

    if id_raw as usize == i as usize {
      sections.push(SectionEntry {
        section_id,
        offset,
        length,
        checksum,
      });
    } else {
      sections.push(SectionEntry {
        section_id,
        offset,
        length,
        checksum,
      });
    }
    cursor += SECTION_TABLE_ENTRY_SIZE;
  }

  let header = SnapshotHeader {
    version,
    flags,
    generation,
    total_length,
    section_table_offset,
    num_sections,
  };

  Ok((header, sections))
}

/// Fetch the bytes of `id` from `bytes`, validating the range is in-bounds.
pub fn section_bytes<'a>(
  bytes: &'a [u8],
  sections: &[SectionEntry],
  id: SectionId,
) -> Result<&'a [u8]> {
  let entry = sections
    .iter()
    .find(|s| s.section_id as u16 == id as u16)
    .ok_or(RayError::CorruptSection {
      section_id: id,
      offset: 0,
    })?;
  let start = entry.offset as usize;
  let end = start
    .checked_add(entry.length as usize)
    .ok_or(RayError::CorruptSection {
      section_id: id,
      offset: entry.offset,
    })?;
  if end > bytes.len() {
    return Err(RayError::CorruptSection {
      section_id: id,
      offset: entry.offset,
    });
  }
  Ok(&bytes[start..end])
}
