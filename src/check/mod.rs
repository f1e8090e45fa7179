//! Snapshot structural integrity checks (spec.md §6 "check").
//!
//! Ported from src/check/checker.ts

use std::path::Path;

use crate::core::snapshot::format::{parse_header_and_sections, section_bytes};
use crate::core::snapshot::reader::SnapshotData;
use crate::error::Result;
use crate::types::{CheckResult, SectionId};
use crate::util::binary::read_u32_at;
use crate::util::mmap::Mmap;

/// Open the snapshot at `path` and validate its CSR structure: monotonic
/// offset tables, in-range edge endpoints, a sorted and reciprocal
/// out/in adjacency, and a node/phys mapping that round-trips both ways.
pub fn check(path: &Path) -> Result<CheckResult> {
  let mmap = Mmap::open(path)?;
  let bytes = mmap.as_slice();
  let (_header, sections) = parse_header_and_sections(bytes)?;
  let snapshot = SnapshotData::open(path)?;

  let mut errors = Vec::new();
  let mut warnings = Vec::new();
  let num_nodes = snapshot.num_nodes;
  let num_edges = snapshot.num_edges;

  let section = |id: SectionId| section_bytes(bytes, &sections, id).ok();

  let out_offsets = section(SectionId::OutOffsets);
  let out_etype = section(SectionId::OutEtype);
  let out_dst = section(SectionId::OutDst);
  let in_offsets = section(SectionId::InOffsets);
  let in_src = section(SectionId::InSrc);
  let in_etype = section(SectionId::InEtype);

  check_csr_offsets("out_offsets", out_offsets, num_nodes, num_edges, &mut errors);
  check_csr_offsets("in_offsets", in_offsets, num_nodes, num_edges, &mut errors);
  check_edge_endpoints("out_dst", out_dst, num_edges, num_nodes, &mut errors);
  check_edge_endpoints("in_src", in_src, num_edges, num_nodes, &mut errors);

  if let (Some(oo), Some(oe), Some(od)) = (out_offsets, out_etype, out_dst) {
    check_out_edge_sorting(oo, oe, od, num_nodes, &mut errors, &mut warnings);
  }

  if let (Some(oo), Some(oe), Some(od), Some(io), Some(is), Some(ie)) = (out_offsets, out_etype, out_dst, in_offsets, in_src, in_etype) {
    check_reciprocity(oo, oe, od, io, is, ie, num_nodes, &mut errors);
  }

  check_node_mapping(&snapshot, &mut errors);

  if let Some(key_string) = section(SectionId::NodeKeyString) {
    check_key_uniqueness(&snapshot, key_string, &mut errors);
  }

  Ok(CheckResult {
    valid: errors.is_empty(),
    errors,
    warnings,
  })
}

fn check_csr_offsets(name: &str, offsets: Option<&[u8]>, num_nodes: usize, num_edges: usize, errors: &mut Vec<String>) {
  let Some(offsets) = offsets else {
    errors.push(format!("{name} section missing"));
    return;
  };
  if offsets.len() < (num_nodes + 1) * 4 {
    errors.push(format!("{name} section is too small"));
    return;
  }
  let mut prev = 0u32;
  for i in 0..=num_nodes {
    let Ok(current) = read_u32_at(offsets, i * 4) else {
      errors.push(format!("{name} truncated at index {i}"));
      return;
    };
    if current < prev {
      errors.push(format!("{name} not monotonic at index {i}: {prev} -> {current}"));
      return;
    }
    prev = current;
  }
  if prev as usize != num_edges {
    errors.push(format!("{name} final value {prev} != num_edges {num_edges}"));
  }
}

fn check_edge_endpoints(name: &str, data: Option<&[u8]>, num_edges: usize, num_nodes: usize, errors: &mut Vec<String>) {
  let Some(data) = data else {
    errors.push(format!("{name} section missing"));
    return;
  };
  if data.len() < num_edges * 4 {
    errors.push(format!("{name} section is too small"));
    return;
  }
  for i in 0..num_edges {
    let Ok(value) = read_u32_at(data, i * 4) else { continue };
    if value as usize >= num_nodes {
      errors.push(format!("{name}[{i}] = {value} out of range [0, {num_nodes})"));
    }
  }
}

fn check_out_edge_sorting(out_offsets: &[u8], out_etype: &[u8], out_dst: &[u8], num_nodes: usize, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
  for phys in 0..num_nodes {
    let (Ok(start), Ok(end)) = (read_u32_at(out_offsets, phys * 4), read_u32_at(out_offsets, (phys + 1) * 4)) else {
      continue;
    };
    let (start, end) = (start as usize, end as usize);
    for i in (start + 1)..end {
      let (Ok(pe), Ok(pd), Ok(ce), Ok(cd)) = (
        read_u32_at(out_etype, (i - 1) * 4),
        read_u32_at(out_dst, (i - 1) * 4),
        read_u32_at(out_etype, i * 4),
        read_u32_at(out_dst, i * 4),
      ) else {
        continue;
      };
      match (pe, pd).cmp(&(ce, cd)) {
        std::cmp::Ordering::Greater => {
          errors.push(format!("out-edges not sorted for phys {phys} at index {i}: ({pe},{pd}) > ({ce},{cd})"));
          break;
        }
        std::cmp::Ordering::Equal => {
          warnings.push(format!("duplicate out-edge for phys {phys}: ({ce},{cd})"));
        }
        std::cmp::Ordering::Less => {}
      }
    }
  }
}

fn check_reciprocity(
  out_offsets: &[u8],
  out_etype: &[u8],
  out_dst: &[u8],
  in_offsets: &[u8],
  in_src: &[u8],
  in_etype: &[u8],
  num_nodes: usize,
  errors: &mut Vec<String>,
) {
  for src_phys in 0..num_nodes {
    let (Ok(start), Ok(end)) = (read_u32_at(out_offsets, src_phys * 4), read_u32_at(out_offsets, (src_phys + 1) * 4)) else {
      continue;
    };
    for out_idx in start as usize..end as usize {
      let (Ok(dst_phys), Ok(etype)) = (read_u32_at(out_dst, out_idx * 4), read_u32_at(out_etype, out_idx * 4)) else {
        continue;
      };
      let dst_phys = dst_phys as usize;
      if dst_phys >= num_nodes {
        continue;
      }
      let (Ok(in_start), Ok(in_end)) = (read_u32_at(in_offsets, dst_phys * 4), read_u32_at(in_offsets, (dst_phys + 1) * 4)) else {
        continue;
      };
      let mut found = false;
      for in_idx in in_start as usize..in_end as usize {
        let (Ok(is), Ok(ie)) = (read_u32_at(in_src, in_idx * 4), read_u32_at(in_etype, in_idx * 4)) else { continue };
        if is as usize == src_phys && ie == etype {
          found = true;
          break;
        }
      }
      if !found {
        errors.push(format!("missing reciprocal in-edge: out[{src_phys}] -({etype})-> [{dst_phys}]"));
      }
    }
  }
}

fn check_node_mapping(snapshot: &SnapshotData, errors: &mut Vec<String>) {
  for node_id in snapshot.all_node_ids() {
    let Some(phys) = snapshot.phys_of(node_id) else {
      errors.push(format!("node {node_id} missing from node/phys mapping"));
      continue;
    };
    match snapshot.node_id_of(phys) {
      Ok(back) if back == node_id => {}
      Ok(back) => errors.push(format!("mapping mismatch: node {node_id} -> phys {phys} -> node {back}")),
      Err(e) => errors.push(format!("phys {phys} for node {node_id} unreadable: {e}")),
    }
  }
}

fn check_key_uniqueness(snapshot: &SnapshotData, _key_string: &[u8], errors: &mut Vec<String>) {
  use std::collections::HashSet;
  let mut seen = HashSet::new();
  for node_id in snapshot.all_node_ids() {
    let Some(phys) = snapshot.phys_of(node_id) else { continue };
    match snapshot.key_of(phys) {
      Ok(Some(key)) => {
        if !seen.insert(key.to_string()) {
          errors.push(format!("duplicate node key {key:?}"));
        }
      }
      Ok(None) => {}
      Err(e) => errors.push(format!("key for node {node_id} unreadable: {e}")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::check;
  use crate::core::compactor;
  use crate::core::delta::Delta;
  use crate::vector::VectorStore;
  use tempfile::tempdir;

  #[test]
  fn fresh_empty_snapshot_is_valid() {
    let dir = tempdir().unwrap();
    compactor::compact(dir.path(), None, &mut Delta::new(), &VectorStore::new(), 1, None).unwrap();
    let result = check(&dir.path().join("current.bin")).unwrap();
    assert!(result.valid, "errors: {:?}", result.errors);
  }
}
