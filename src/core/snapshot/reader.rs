//! CSR snapshot reader — mmap-backed, zero-copy reads over the section
//! layout produced by `writer.rs` (spec.md §4.1).
//!
//! Ported from src/core/snapshot-reader.ts

use crate::core::snapshot::format::{parse_header_and_sections, section_bytes, SectionEntry};
use crate::core::snapshot::writer::decode_prop_value;
use crate::error::{RayError, Result};
use crate::types::{ETypeId, NodeId, PhysNode, PropKeyId, PropValue, SectionId};
use crate::util::binary::{read_u32_at, read_u64_at, Reader};
use crate::util::mmap::Mmap;
use std::path::Path;

pub struct SnapshotData {
  mmap: Mmap,
  pub generation: u64,
  sections: Vec<SectionEntry>,
  pub num_nodes: usize,
  pub num_edges: usize,
  pub max_node_id: NodeId,
  /// `NodeId -> PhysNode`, sorted by `NodeId` for binary search.
  node_id_to_phys_sorted: Vec<(NodeId, PhysNode)>,
}

impl SnapshotData {
  pub fn open(path: &Path) -> Result<Self> {
    let mmap = Mmap::open(path)?;
    let bytes = mmap.as_slice();
    let (header, sections) = parse_header_and_sections(bytes)?;

    let header_bytes = section_bytes(bytes, &sections, SectionId::Header)?;
    if header_bytes.len() < 20 {
      return Err(RayError::CorruptSection {
        section_id: SectionId::Header,
        offset: 0,
      });
    }
    let num_nodes = read_u64_at(header_bytes, 0)? as usize;
    let num_edges = read_u64_at(header_bytes, 8)? as usize;
    let max_node_id = read_u32_at(header_bytes, 16)?;

    let nodeid_to_phys_bytes = section_bytes(bytes, &sections, SectionId::NodeIdToPhys)?;
    let mut node_id_to_phys_sorted = Vec::with_capacity(nodeid_to_phys_bytes.len() / 8);
    let mut cursor = 0;
    while cursor + 8 <= nodeid_to_phys_bytes.len() {
      let id = read_u32_at(nodeid_to_phys_bytes, cursor)?;
      let phys = read_u32_at(nodeid_to_phys_bytes, cursor + 4)?;
      node_id_to_phys_sorted.push((id, phys));
      cursor += 8;
    }

    Ok(Self {
      mmap,
      generation: header.generation,
      sections,
      num_nodes,
      num_edges,
      max_node_id,
      node_id_to_phys_sorted,
    })
  }

  fn bytes(&self) -> &[u8] {
    self.mmap.as_slice()
  }

  fn section(&self, id: SectionId) -> Result<&[u8]> {
    section_bytes(self.bytes(), &self.sections, id)
  }

  pub fn phys_of(&self, node_id: NodeId) -> Option<PhysNode> {
    self
      .node_id_to_phys_sorted
      .binary_search_by_key(&node_id, |(id, _)| *id)
      .ok()
      .map(|idx| self.node_id_to_phys_sorted[idx].1)
  }

  /// Every node id present in this snapshot, sorted ascending. Used by the
  /// compactor to enumerate surviving nodes when merging in a delta.
  pub fn all_node_ids(&self) -> Vec<NodeId> {
    self.node_id_to_phys_sorted.iter().map(|(id, _)| *id).collect()
  }

  pub fn node_id_of(&self, phys: PhysNode) -> Result<NodeId> {
    let section = self.section(SectionId::PhysToNodeId)?;
    read_u32_at(section, phys as usize * 4)
  }

  pub fn string_of(&self, string_id: u32) -> Result<&str> {
    if string_id == u32::MAX {
      return Err(RayError::NotFound);
    }
    let offsets = self.section(SectionId::StringOffsets)?;
    let bytes = self.section(SectionId::StringBytes)?;
    let start = read_u32_at(offsets, string_id as usize * 4)? as usize;
    let end = read_u32_at(offsets, (string_id as usize + 1) * 4)? as usize;
    if end > bytes.len() || start > end {
      return Err(RayError::CorruptSection {
        section_id: SectionId::StringBytes,
        offset: start as u64,
      });
    }
    std::str::from_utf8(&bytes[start..end]).map_err(|_| RayError::CorruptSection {
      section_id: SectionId::StringBytes,
      offset: start as u64,
    })
  }

  pub fn key_of(&self, phys: PhysNode) -> Result<Option<&str>> {
    let section = self.section(SectionId::NodeKeyString)?;
    let sid = read_u32_at(section, phys as usize * 4)?;
    if sid == u32::MAX {
      Ok(None)
    } else {
      Ok(Some(self.string_of(sid)?))
    }
  }

  /// Sorted label ids held by `phys`.
  pub fn labels_of(&self, phys: PhysNode) -> Result<Vec<crate::types::LabelId>> {
    let (start, end) = self.csr_range(SectionId::NodeLabelOffsets, phys)?;
    let ids = self.section(SectionId::NodeLabelIds)?;
    let mut out = Vec::with_capacity(end - start);
    for i in start..end {
      out.push(read_u32_at(ids, i * 4)?);
    }
    Ok(out)
  }

  fn csr_range(&self, offsets_id: SectionId, phys: PhysNode) -> Result<(usize, usize)> {
    let offsets = self.section(offsets_id)?;
    let start = read_u32_at(offsets, phys as usize * 4)? as usize;
    let end = read_u32_at(offsets, (phys as usize + 1) * 4)? as usize;
    Ok((start, end))
  }

  /// Outgoing `(etype, dst_phys)` pairs for `phys`, sorted by `(etype, dst_phys)`.
  pub fn out_edges_of(&self, phys: PhysNode) -> Result<Vec<(ETypeId, PhysNode)>> {
    let (start, end) = self.csr_range(SectionId::OutOffsets, phys)?;
    let etype = self.section(SectionId::OutEtype)?;
    let dst = self.section(SectionId::OutDst)?;
    let mut out = Vec::with_capacity(end - start);
    for i in start..end {
      out.push((read_u32_at(etype, i * 4)?, read_u32_at(dst, i * 4)?));
    }
    Ok(out)
  }

  /// Incoming `(etype, src_phys)` pairs for `phys`.
  pub fn in_edges_of(&self, phys: PhysNode) -> Result<Vec<(ETypeId, PhysNode)>> {
    let (start, end) = self.csr_range(SectionId::InOffsets, phys)?;
    let etype = self.section(SectionId::InEtype)?;
    let src = self.section(SectionId::InSrc)?;
    let mut out = Vec::with_capacity(end - start);
    for i in start..end {
      out.push((read_u32_at(etype, i * 4)?, read_u32_at(src, i * 4)?));
    }
    Ok(out)
  }

  /// Binary search the sorted out-CSR sub-range for `(etype, dst_phys)`.
  pub fn has_edge(&self, src_phys: PhysNode, etype: ETypeId, dst_phys: PhysNode) -> Result<bool> {
    let edges = self.out_edges_of(src_phys)?;
    Ok(edges.binary_search(&(etype, dst_phys)).is_ok())
  }

  /// Flat index of `(etype, dst_phys)` within `src_phys`'s out range, used
  /// to address edge properties.
  pub fn out_edge_flat_index(
    &self,
    src_phys: PhysNode,
    etype: ETypeId,
    dst_phys: PhysNode,
  ) -> Result<Option<usize>> {
    let (start, _end) = self.csr_range(SectionId::OutOffsets, src_phys)?;
    let edges = self.out_edges_of(src_phys)?;
    Ok(
      edges
        .binary_search(&(etype, dst_phys))
        .ok()
        .map(|idx| start + idx),
    )
  }

  /// `data` is a section laid out as: `u32 num_offsets`, then
  /// `num_offsets` little-endian u32 offsets (relative to the end of the
  /// offsets array), then the concatenated `(u32 key, encoded value)`
  /// entries for every record in order.
  fn record_prop(&self, data: &[u8], loc: usize, prop_key_id: PropKeyId) -> Result<Option<PropValue>> {
    let num_offsets = read_u32_at(data, 0)? as usize;
    if loc + 1 >= num_offsets {
      return Ok(None);
    }
    let offsets_base = 4;
    let entries_base = offsets_base + num_offsets * 4;
    let start = read_u32_at(data, offsets_base + loc * 4)? as usize + entries_base;
    let end = read_u32_at(data, offsets_base + (loc + 1) * 4)? as usize + entries_base;
    if end > data.len() || start > end {
      return Err(RayError::CorruptSection {
        section_id: SectionId::NodeProps,
        offset: start as u64,
      });
    }
    let mut cursor = start;
    while cursor < end {
      let key = read_u32_at(data, cursor)?;
      let mut r = Reader::new(&data[cursor + 4..end]);
      let value = decode_prop_value(&mut r)?;
      let consumed = r.pos();
      if key == prop_key_id {
        return Ok(Some(value));
      }
      cursor += 4 + consumed;
    }
    Ok(None)
  }

  pub fn get_node_prop(&self, phys: PhysNode, prop_key_id: PropKeyId) -> Result<Option<PropValue>> {
    let data = self.section(SectionId::NodeProps)?;
    self.record_prop(data, phys as usize, prop_key_id)
  }

  /// `edge_loc` is the flat index of the edge within the out-CSR arrays, as
  /// returned by `out_edge_flat_index`.
  pub fn get_edge_prop(&self, edge_loc: usize, prop_key_id: PropKeyId) -> Result<Option<PropValue>> {
    let data = self.section(SectionId::EdgeProps)?;
    self.record_prop(data, edge_loc, prop_key_id)
  }

  fn record_all_props(&self, data: &[u8], loc: usize) -> Result<Vec<(PropKeyId, PropValue)>> {
    let num_offsets = read_u32_at(data, 0)? as usize;
    if loc + 1 >= num_offsets {
      return Ok(Vec::new());
    }
    let offsets_base = 4;
    let entries_base = offsets_base + num_offsets * 4;
    let start = read_u32_at(data, offsets_base + loc * 4)? as usize + entries_base;
    let end = read_u32_at(data, offsets_base + (loc + 1) * 4)? as usize + entries_base;
    if end > data.len() || start > end {
      return Err(RayError::CorruptSection {
        section_id: SectionId::NodeProps,
        offset: start as u64,
      });
    }
    let mut cursor = start;
    let mut out = Vec::new();
    while cursor < end {
      let key = read_u32_at(data, cursor)?;
      let mut r = Reader::new(&data[cursor + 4..end]);
      let value = decode_prop_value(&mut r)?;
      let consumed = r.pos();
      out.push((key, value));
      cursor += 4 + consumed;
    }
    Ok(out)
  }

  /// Every `(prop_key_id, value)` pair stored for `phys`, used by the
  /// compactor to carry forward properties untouched by the delta.
  pub fn all_node_props(&self, phys: PhysNode) -> Result<Vec<(PropKeyId, PropValue)>> {
    let data = self.section(SectionId::NodeProps)?;
    self.record_all_props(data, phys as usize)
  }

  pub fn all_edge_props(&self, edge_loc: usize) -> Result<Vec<(PropKeyId, PropValue)>> {
    let data = self.section(SectionId::EdgeProps)?;
    self.record_all_props(data, edge_loc)
  }

  /// Name of dictionary entry `id` (1-based) in `section`, or `None` if out
  /// of range. Used by the compactor to merge old and newly-defined names
  /// into a fresh string arena.
  fn dict_name(&self, section: SectionId, id: u32) -> Result<Option<&str>> {
    if id == 0 {
      return Ok(None);
    }
    let data = self.section(section)?;
    let idx = (id - 1) as usize;
    if (idx + 1) * 4 > data.len() {
      return Ok(None);
    }
    let sid = read_u32_at(data, idx * 4)?;
    Ok(Some(self.string_of(sid)?))
  }

  pub fn label_name(&self, id: crate::types::LabelId) -> Result<Option<&str>> {
    self.dict_name(SectionId::Labels, id)
  }
  pub fn etype_name(&self, id: ETypeId) -> Result<Option<&str>> {
    self.dict_name(SectionId::Etypes, id)
  }
  pub fn propkey_name(&self, id: PropKeyId) -> Result<Option<&str>> {
    self.dict_name(SectionId::Propkeys, id)
  }

  pub fn max_label_id(&self) -> Result<u32> {
    Ok((self.section(SectionId::Labels)?.len() / 4) as u32)
  }
  pub fn max_etype_id(&self) -> Result<u32> {
    Ok((self.section(SectionId::Etypes)?.len() / 4) as u32)
  }
  pub fn max_propkey_id(&self) -> Result<u32> {
    Ok((self.section(SectionId::Propkeys)?.len() / 4) as u32)
  }

  pub fn vector_manifest_bytes(&self) -> Result<&[u8]> {
    self.section(SectionId::VectorManifest)
  }
  pub fn vector_fragment_bytes(&self) -> Result<&[u8]> {
    self.section(SectionId::VectorFragment)
  }
  pub fn vector_index_bytes(&self) -> Result<&[u8]> {
    self.section(SectionId::VectorIndex)
  }
  pub fn vector_node_map_bytes(&self) -> Result<&[u8]> {
    self.section(SectionId::VectorNodeMap)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::snapshot::model::{NodeRecord, SnapshotModel};
  use crate::core::snapshot::writer::write_snapshot;
  use tempfile::tempdir;

  fn sample_model() -> SnapshotModel {
    SnapshotModel {
      generation: 1,
      strings: vec!["alice".into(), "bob".into(), "KNOWS".into()],
      labels: vec![],
      etypes: vec![2],
      propkeys: vec![],
      nodes: vec![
        NodeRecord {
          node_id: 10,
          key: Some("alice".into()),
          labels: vec![],
          props: vec![(1, PropValue::Int(42))],
          out_edges: vec![(1, 20)],
        },
        NodeRecord {
          node_id: 20,
          key: Some("bob".into()),
          labels: vec![],
          props: vec![],
          out_edges: vec![],
        },
      ],
      edge_props: vec![((10, 1, 20), vec![(5, PropValue::Str("since-2020".into()))])],
      vector_manifest: vec![],
      vector_fragments: vec![],
      vector_index: vec![],
      vector_node_map: vec![],
    }
  }

  #[test]
  fn roundtrip_basic_graph() {
    let dir = tempdir().unwrap();
    let model = sample_model();
    let path = write_snapshot(dir.path(), &model).unwrap();
    let snap = SnapshotData::open(&path).unwrap();

    assert_eq!(snap.num_nodes, 2);
    assert_eq!(snap.num_edges, 1);
    assert_eq!(snap.generation, 1);

    let alice_phys = snap.phys_of(10).unwrap();
    let bob_phys = snap.phys_of(20).unwrap();
    assert_eq!(snap.key_of(alice_phys).unwrap(), Some("alice"));
    assert_eq!(snap.node_id_of(bob_phys).unwrap(), 20);

    let out = snap.out_edges_of(alice_phys).unwrap();
    assert_eq!(out, vec![(1, bob_phys)]);
    assert!(snap.has_edge(alice_phys, 1, bob_phys).unwrap());
    assert!(!snap.has_edge(bob_phys, 1, alice_phys).unwrap());

    let in_edges = snap.in_edges_of(bob_phys).unwrap();
    assert_eq!(in_edges, vec![(1, alice_phys)]);

    let prop = snap.get_node_prop(alice_phys, 1).unwrap();
    assert!(matches!(prop, Some(PropValue::Int(42))));
    assert!(snap.get_node_prop(bob_phys, 1).unwrap().is_none());

    let loc = snap.out_edge_flat_index(alice_phys, 1, bob_phys).unwrap().unwrap();
    let eprop = snap.get_edge_prop(loc, 5).unwrap();
    assert_eq!(eprop, Some(PropValue::Str("since-2020".into())));
  }

  #[test]
  fn truncated_file_is_corrupt_not_panic() {
    let dir = tempdir().unwrap();
    let model = sample_model();
    let path = write_snapshot(dir.path(), &model).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    let truncated = &bytes[..bytes.len() / 2];
    std::fs::write(&path, truncated).unwrap();

    assert!(SnapshotData::open(&path).is_err());
  }
}
