//! Per-property-key vector manifest: global config, fragment list, and the
//! `NodeId <-> VectorId <-> (fragment, local index)` maps (spec.md §4.7
//! "Manifest").

use crate::constants::{DEFAULT_FRAGMENT_TARGET_SIZE, DEFAULT_ROW_GROUP_SIZE, INITIAL_VECTOR_ID};
use crate::error::{RayError, Result};
use crate::types::{DistanceMetric, FragmentState, NodeId, VectorId};
use crate::util::binary::{write_u32, write_u8, Reader};
use crate::vector::fragment::Fragment;
use std::collections::HashMap;

pub struct VectorManifest {
  dimensions: Option<usize>,
  pub metric: DistanceMetric,
  pub row_group_size: usize,
  pub fragment_target_size: usize,
  pub normalize: bool,
  fragments: Vec<Fragment>,
  active_fragment: Option<u64>,
  pub total_vectors: u64,
  pub deleted_vectors: u64,
  next_vector_id: VectorId,
  next_fragment_id: u64,
  node_to_vector: HashMap<NodeId, VectorId>,
  vector_to_node: HashMap<VectorId, NodeId>,
  vector_location: HashMap<VectorId, (u64, usize)>,
}

impl VectorManifest {
  pub fn new(metric: DistanceMetric) -> Self {
    Self {
      dimensions: None,
      metric,
      row_group_size: DEFAULT_ROW_GROUP_SIZE,
      fragment_target_size: DEFAULT_FRAGMENT_TARGET_SIZE,
      normalize: matches!(metric, DistanceMetric::Cosine),
      fragments: Vec::new(),
      active_fragment: None,
      total_vectors: 0,
      deleted_vectors: 0,
      next_vector_id: INITIAL_VECTOR_ID,
      next_fragment_id: 0,
      node_to_vector: HashMap::new(),
      vector_to_node: HashMap::new(),
      vector_location: HashMap::new(),
    }
  }

  pub fn with_tuning(mut self, row_group_size: usize, fragment_target_size: usize) -> Self {
    self.row_group_size = row_group_size;
    self.fragment_target_size = fragment_target_size;
    self
  }

  pub fn dimensions(&self) -> Option<usize> {
    self.dimensions
  }

  fn fragment_by_id(&self, id: u64) -> Option<&Fragment> {
    self.fragments.iter().find(|f| f.id == id)
  }
  fn fragment_by_id_mut(&mut self, id: u64) -> Option<&mut Fragment> {
    self.fragments.iter_mut().find(|f| f.id == id)
  }

  fn ensure_active(&mut self) -> u64 {
    if let Some(id) = self.active_fragment {
      if !self.fragment_by_id(id).expect("active fragment id is always valid").is_full() {
        return id;
      }
      self.fragment_by_id_mut(id).unwrap().seal();
      self.active_fragment = None;
    }
    let id = self.next_fragment_id;
    self.next_fragment_id += 1;
    let dims = self.dimensions.expect("dimensions are set before the first insert");
    self.fragments.push(Fragment::new(id, dims, self.row_group_size, self.fragment_target_size));
    self.active_fragment = Some(id);
    id
  }

  /// Insert or replace `node_id`'s vector. The first call across the
  /// manifest's lifetime fixes `dimensions`; later calls with a mismatched
  /// length fail with `DimensionMismatch`.
  pub fn insert(&mut self, node_id: NodeId, vector: &[f32]) -> Result<VectorId> {
    match self.dimensions {
      Some(d) if d != vector.len() => {
        return Err(RayError::DimensionMismatch {
          expected: d,
          got: vector.len(),
        });
      }
      None => self.dimensions = Some(vector.len()),
      _ => {}
    }

    if let Some(&old_vid) = self.node_to_vector.get(&node_id) {
      self.vector_to_node.remove(&old_vid);
      self.tombstone_vector(old_vid);
    }

    let frag_id = self.ensure_active();
    let frag = self.fragment_by_id_mut(frag_id).unwrap();
    let local = frag.insert(vector, self.normalize);

    let vid = self.next_vector_id;
    self.next_vector_id += 1;
    self.node_to_vector.insert(node_id, vid);
    self.vector_to_node.insert(vid, node_id);
    self.vector_location.insert(vid, (frag_id, local));
    self.total_vectors += 1;
    Ok(vid)
  }

  fn tombstone_vector(&mut self, vid: VectorId) {
    if let Some(&(frag_id, local)) = self.vector_location.get(&vid) {
      if let Some(frag) = self.fragment_by_id_mut(frag_id) {
        if !frag.is_deleted(local) {
          frag.tombstone(local);
          self.deleted_vectors += 1;
        }
      }
    }
  }

  /// Tombstone `node_id`'s vector (both directions of the map); returns
  /// `false` if it had none.
  pub fn delete(&mut self, node_id: NodeId) -> bool {
    let Some(vid) = self.node_to_vector.remove(&node_id) else {
      return false;
    };
    self.vector_to_node.remove(&vid);
    self.tombstone_vector(vid);
    true
  }

  pub fn vector_id_of_node(&self, node_id: NodeId) -> Option<VectorId> {
    self.node_to_vector.get(&node_id).copied()
  }

  pub fn node_id_of_vector(&self, vid: VectorId) -> Option<NodeId> {
    self.vector_to_node.get(&vid).copied()
  }

  pub fn vector_of_node(&self, node_id: NodeId) -> Option<&[f32]> {
    let vid = self.vector_id_of_node(node_id)?;
    self.vector_of_id(vid)
  }

  pub fn vector_of_id(&self, vid: VectorId) -> Option<&[f32]> {
    let &(frag_id, local) = self.vector_location.get(&vid)?;
    let frag = self.fragment_by_id(frag_id)?;
    if frag.is_deleted(local) {
      None
    } else {
      Some(frag.get(local))
    }
  }

  pub fn is_deleted(&self, vid: VectorId) -> bool {
    match self.vector_location.get(&vid) {
      Some(&(frag_id, local)) => self.fragment_by_id(frag_id).map_or(true, |f| f.is_deleted(local)),
      None => true,
    }
  }

  /// All live `(vector_id, vector)` pairs, used for IVF training/backfill.
  pub fn live_vectors(&self) -> impl Iterator<Item = (VectorId, &[f32])> + '_ {
    self.vector_location.iter().filter_map(move |(&vid, &(frag_id, local))| {
      let frag = self.fragment_by_id(frag_id)?;
      if frag.is_deleted(local) {
        None
      } else {
        Some((vid, frag.get(local)))
      }
    })
  }

  pub fn fragments(&self) -> &[Fragment] {
    &self.fragments
  }

  /// Sealed fragments whose deletion ratio is at least `threshold`.
  pub fn compaction_candidates(&self, threshold: f32) -> Vec<u64> {
    self
      .fragments
      .iter()
      .filter(|f| f.state == FragmentState::Sealed && f.deletion_ratio() >= threshold)
      .map(|f| f.id)
      .collect()
  }

  /// Compact sealed fragments whose deletion ratio is at least `threshold`
  /// into one fresh sealed fragment; old fragments are retired (their ids
  /// are kept for chronology, storage is released). Returns the number of
  /// vectors carried forward.
  pub fn compact_fragments(&mut self, threshold: f32) -> usize {
    let candidates = self.compaction_candidates(threshold);
    if candidates.is_empty() {
      return 0;
    }
    let Some(dims) = self.dimensions else { return 0 };

    for &id in &candidates {
      if let Some(f) = self.fragment_by_id_mut(id) {
        f.state = FragmentState::SealedDraining;
      }
    }

    let new_id = self.next_fragment_id;
    self.next_fragment_id += 1;
    let mut replacement = Fragment::new(new_id, dims, self.row_group_size, self.fragment_target_size);
    let mut remap: Vec<(VectorId, usize)> = Vec::new();

    for &old_id in &candidates {
      let vectors: Vec<(VectorId, Vec<f32>)> = self
        .vector_location
        .iter()
        .filter(|(_, &(frag_id, _))| frag_id == old_id)
        .filter_map(|(&vid, &(frag_id, local))| {
          let frag = self.fragment_by_id(frag_id)?;
          if frag.is_deleted(local) {
            None
          } else {
            Some((vid, frag.get(local).to_vec()))
          }
        })
        .collect();
      for (vid, vector) in vectors {
        let local = replacement.insert(&vector, false);
        remap.push((vid, local));
      }
    }
    replacement.seal();
    let carried = remap.len();
    for (vid, local) in remap {
      self.vector_location.insert(vid, (new_id, local));
    }
    for &id in &candidates {
      if let Some(f) = self.fragment_by_id_mut(id) {
        f.state = FragmentState::Retired;
        f.release();
      }
    }
    self.fragments.push(replacement);
    carried
  }

  pub fn encode(&self, buf: &mut Vec<u8>) {
    write_u32(buf, self.dimensions.unwrap_or(0) as u32);
    write_u8(buf, self.metric as u8);
    write_u32(buf, self.row_group_size as u32);
    write_u32(buf, self.fragment_target_size as u32);
    write_u8(buf, if self.normalize { 1 } else { 0 });
    write_u32(buf, self.active_fragment.map(|id| id as u32).unwrap_or(u32::MAX));
    write_u64_(buf, self.total_vectors);
    write_u64_(buf, self.deleted_vectors);
    write_u64_(buf, self.next_vector_id);
    write_u32(buf, self.next_fragment_id as u32);

    write_u32(buf, self.node_to_vector.len() as u32);
    for (&node_id, &vid) in &self.node_to_vector {
      write_u32(buf, node_id);
      write_u64_(buf, vid);
    }
    write_u32(buf, self.vector_location.len() as u32);
    for (&vid, &(frag_id, local)) in &self.vector_location {
      write_u64_(buf, vid);
      write_u32(buf, frag_id as u32);
      write_u32(buf, local as u32);
    }

    write_u32(buf, self.fragments.len() as u32);
    for f in &self.fragments {
      f.encode(buf);
    }
  }

  pub fn decode(r: &mut Reader) -> Result<Self> {
    let dims = r.read_u32()? as usize;
    let metric = distance_metric_from_u8(r.read_u8()?);
    let row_group_size = r.read_u32()? as usize;
    let fragment_target_size = r.read_u32()? as usize;
    let normalize = r.read_u8()? != 0;
    let active_raw = r.read_u32()?;
    let active_fragment = if active_raw == u32::MAX { None } else { Some(active_raw as u64) };
    let total_vectors = r.read_u64()?;
    let deleted_vectors = r.read_u64()?;
    let next_vector_id = r.read_u64()?;
    let next_fragment_id = r.read_u32()? as u64;

    let node_to_vector_len = r.read_u32()? as usize;
    let mut node_to_vector = HashMap::with_capacity(node_to_vector_len);
    let mut vector_to_node = HashMap::with_capacity(node_to_vector_len);
    for _ in 0..node_to_vector_len {
      let node_id = r.read_u32()?;
      let vid = r.read_u64()?;
      node_to_vector.insert(node_id, vid);
      vector_to_node.insert(vid, node_id);
    }
    let vector_location_len = r.read_u32()? as usize;
    let mut vector_location = HashMap::with_capacity(vector_location_len);
    for _ in 0..vector_location_len {
      let vid = r.read_u64()?;
      let frag_id = r.read_u32()? as u64;
      let local = r.read_u32()? as usize;
      vector_location.insert(vid, (frag_id, local));
    }

    let fragment_count = r.read_u32()? as usize;
    let mut fragments = Vec::with_capacity(fragment_count);
    for _ in 0..fragment_count {
      fragments.push(Fragment::decode(r)?);
    }

    Ok(Self {
      dimensions: if dims == 0 { None } else { Some(dims) },
      metric,
      row_group_size,
      fragment_target_size,
      normalize,
      fragments,
      active_fragment,
      total_vectors,
      deleted_vectors,
      next_vector_id,
      next_fragment_id,
      node_to_vector,
      vector_to_node,
      vector_location,
    })
  }
}

fn write_u64_(buf: &mut Vec<u8>, v: u64) {
  crate::util::binary::write_u64(buf, v);
}

fn distance_metric_from_u8(v: u8) -> DistanceMetric {
  match v {
    1 => DistanceMetric::Euclidean,
    2 => DistanceMetric::Dot,
    _ => DistanceMetric::Cosine,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn insert_fixes_dimensions_and_rejects_mismatch() {
    let mut m = VectorManifest::new(DistanceMetric::Euclidean).with_tuning(4, 8);
    m.insert(1, &[1.0, 2.0, 3.0]).unwrap();
    assert_eq!(m.dimensions(), Some(3));
    let err = m.insert(2, &[1.0, 2.0]).unwrap_err();
    assert!(matches!(err, RayError::DimensionMismatch { expected: 3, got: 2 }));
  }

  #[test]
  fn reinsert_tombstones_previous_vector() {
    let mut m = VectorManifest::new(DistanceMetric::Euclidean).with_tuning(4, 8);
    m.insert(1, &[1.0, 2.0]).unwrap();
    m.insert(1, &[3.0, 4.0]).unwrap();
    assert_eq!(m.deleted_vectors, 1);
    assert_eq!(m.vector_of_node(1), Some(&[3.0, 4.0][..]));
  }

  #[test]
  fn delete_removes_node_mapping() {
    let mut m = VectorManifest::new(DistanceMetric::Euclidean).with_tuning(4, 8);
    m.insert(1, &[1.0, 2.0]).unwrap();
    assert!(m.delete(1));
    assert!(!m.delete(1));
    assert!(m.vector_of_node(1).is_none());
  }

  #[test]
  fn fragment_seals_once_full_and_new_fragment_starts() {
    let mut m = VectorManifest::new(DistanceMetric::Euclidean).with_tuning(2, 3);
    for i in 0..4 {
      m.insert(i, &[i as f32, i as f32]).unwrap();
    }
    assert_eq!(m.fragments().len(), 2);
    assert_eq!(m.fragments()[0].state, FragmentState::Sealed);
  }

  #[test]
  fn compact_fragments_carries_forward_only_live_vectors() {
    let mut m = VectorManifest::new(DistanceMetric::Euclidean).with_tuning(10, 3);
    for i in 0..3 {
      m.insert(i, &[i as f32]).unwrap();
    }
    assert_eq!(m.fragments()[0].state, FragmentState::Sealed);
    m.delete(0);
    m.delete(1);
    let carried = m.compact_fragments(0.5);
    assert_eq!(carried, 1);
    assert_eq!(m.fragments().last().unwrap().state, FragmentState::Sealed);
    assert!(m.vector_of_node(2).is_some());
  }

  #[test]
  fn roundtrip_encode_decode() {
    let mut m = VectorManifest::new(DistanceMetric::Cosine).with_tuning(4, 8);
    m.insert(1, &[1.0, 0.0, 0.0]).unwrap();
    m.insert(2, &[0.0, 1.0, 0.0]).unwrap();
    m.delete(1);

    let mut buf = Vec::new();
    m.encode(&mut buf);
    let mut r = Reader::new(&buf);
    let decoded = VectorManifest::decode(&mut r).unwrap();

    assert_eq!(decoded.dimensions(), Some(3));
    assert_eq!(decoded.total_vectors, 2);
    assert_eq!(decoded.deleted_vectors, 1);
    assert!(decoded.vector_of_node(1).is_none());
    assert!(decoded.vector_of_node(2).is_some());
  }
}
