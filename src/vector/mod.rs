//! Vector property storage and similarity search (spec.md §4.7).
//!
//! Each vector-typed property key owns an independent [`VectorManifest`]
//! (its own dimensionality, metric, and fragment set) and, once built, an
//! independent [`IvfIndex`]. The four vector-related snapshot sections are
//! opaque blobs from the graph compactor's point of view; this module is
//! the only thing that interprets them. `vector_fragment` and
//! `vector_node_map` are reserved section ids in the wire format but are
//! currently unused — `VectorManifest::encode` already carries its
//! fragments and node maps inline, so everything lands in the
//! `vector_manifest` blob and the IVF indices in `vector_index`.

pub mod distance;
pub mod fragment;
pub mod ivf;
pub mod manifest;

use crate::error::{RayError, Result};
use crate::types::{DistanceMetric, NodeId, PropKeyId, VectorId};
use crate::util::binary::{write_u32, Reader};
use ivf::IvfIndex;
use manifest::VectorManifest;
use std::collections::HashMap;

/// One match from [`VectorStore::search`]: the owning node and its
/// similarity score (higher is closer, see [`ivf::distance_to_similarity`]).
pub struct VectorSearchHit {
  pub node_id: NodeId,
  pub vector_id: VectorId,
  pub similarity: f32,
}

/// Per-propkey vector manifests and (once trained) IVF indices for a single
/// data directory.
#[derive(Default)]
pub struct VectorStore {
  manifests: HashMap<PropKeyId, VectorManifest>,
  indices: HashMap<PropKeyId, IvfIndex>,
}

impl VectorStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn dimensions_of(&self, prop_key_id: PropKeyId) -> Option<usize> {
    self.manifests.get(&prop_key_id).and_then(|m| m.dimensions())
  }

  pub fn is_indexed(&self, prop_key_id: PropKeyId) -> bool {
    self.indices.get(&prop_key_id).is_some_and(IvfIndex::is_trained)
  }

  /// Insert or replace `node_id`'s vector for `prop_key_id`. The manifest is
  /// created on first use with `metric`; later calls ignore `metric`. If an
  /// index already exists for this propkey it is kept in sync incrementally
  /// (spec.md §4.7 "IVF insert/delete").
  pub fn add_vector(
    &mut self,
    prop_key_id: PropKeyId,
    node_id: NodeId,
    vector: &[f32],
    metric: DistanceMetric,
  ) -> Result<VectorId> {
    let previous = self
      .manifests
      .get(&prop_key_id)
      .and_then(|m| m.vector_id_of_node(node_id).map(|vid| (vid, m.vector_of_node(node_id).unwrap().to_vec())));

    let manifest = self.manifests.entry(prop_key_id).or_insert_with(|| VectorManifest::new(metric));
    let vid = manifest.insert(node_id, vector)?;

    if let Some(index) = self.indices.get_mut(&prop_key_id) {
      if index.is_trained() {
        if let Some((old_vid, old_vector)) = previous {
          index.delete(old_vid, &old_vector)?;
        }
        index.insert(vid, vector)?;
      }
    }
    Ok(vid)
  }

  /// Tombstone `node_id`'s vector for `prop_key_id`. Returns `false` if it
  /// had none.
  pub fn delete_vector(&mut self, prop_key_id: PropKeyId, node_id: NodeId) -> Result<bool> {
    let Some(manifest) = self.manifests.get_mut(&prop_key_id) else {
      return Ok(false);
    };
    let Some(vid) = manifest.vector_id_of_node(node_id) else {
      return Ok(false);
    };
    let vector = manifest.vector_of_node(node_id).map(<[f32]>::to_vec);
    let removed = manifest.delete(node_id);
    if removed {
      if let (Some(index), Some(vector)) = (self.indices.get_mut(&prop_key_id), vector) {
        if index.is_trained() {
          index.delete(vid, &vector)?;
        }
      }
    }
    Ok(removed)
  }

  /// (Re)build the IVF index for `prop_key_id` from the manifest's current
  /// live vectors (spec.md §4.7 "IVF training").
  pub fn build_index(&mut self, prop_key_id: PropKeyId, n_clusters: usize, max_iterations: usize, seed: Option<u64>) -> Result<()> {
    let manifest = self
      .manifests
      .get(&prop_key_id)
      .ok_or(RayError::DimensionsUnset { prop_key_id })?;
    let dimensions = manifest.dimensions().ok_or(RayError::DimensionsUnset { prop_key_id })?;

    let mut index = IvfIndex::new(dimensions, manifest.metric, n_clusters);
    for (_, vector) in manifest.live_vectors() {
      index.add_training(vector)?;
    }
    index.train(max_iterations, seed)?;
    for (vid, vector) in manifest.live_vectors() {
      index.insert(vid, vector)?;
    }
    self.indices.insert(prop_key_id, index);
    Ok(())
  }

  /// Probe the `n_probe` nearest clusters for the `k` nearest live vectors
  /// under `prop_key_id`'s index, optionally restricted by `filter` on node
  /// id (spec.md §4.7 "IVF search"). Fails with `IndexNotTrained` if
  /// `build_index` has not been called for this propkey.
  pub fn search(
    &self,
    prop_key_id: PropKeyId,
    query: &[f32],
    k: usize,
    n_probe: usize,
    filter: Option<&dyn Fn(NodeId) -> bool>,
  ) -> Result<Vec<VectorSearchHit>> {
    let index = self.indices.get(&prop_key_id).ok_or(RayError::IndexNotTrained)?;
    let manifest = self.manifests.get(&prop_key_id).ok_or(RayError::IndexNotTrained)?;

    let vector_filter = |vid: VectorId| -> bool {
      match filter {
        Some(f) => manifest.node_id_of_vector(vid).is_some_and(f),
        None => true,
      }
    };

    let results = index.search(query, k, n_probe, Some(&vector_filter), |vid| manifest.vector_of_id(vid).map(<[f32]>::to_vec))?;

    Ok(
      results
        .into_iter()
        .filter_map(|r| {
          manifest.node_id_of_vector(r.vector_id).map(|node_id| VectorSearchHit {
            node_id,
            vector_id: r.vector_id,
            similarity: r.similarity,
          })
        })
        .collect(),
    )
  }

  /// Run fragment compaction for `prop_key_id`'s sealed fragments at or
  /// above `threshold` deletion ratio. Returns the number of vectors
  /// carried forward.
  pub fn compact_fragments(&mut self, prop_key_id: PropKeyId, threshold: f32) -> usize {
    match self.manifests.get_mut(&prop_key_id) {
      Some(m) => m.compact_fragments(threshold),
      None => 0,
    }
  }

  pub fn encode_manifests(&self) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u32(&mut buf, self.manifests.len() as u32);
    for (&prop_key_id, manifest) in &self.manifests {
      write_u32(&mut buf, prop_key_id);
      manifest.encode(&mut buf);
    }
    buf
  }

  pub fn encode_indices(&self) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u32(&mut buf, self.indices.len() as u32);
    for (&prop_key_id, index) in &self.indices {
      write_u32(&mut buf, prop_key_id);
      index.encode(&mut buf);
    }
    buf
  }

  pub fn decode(manifest_bytes: &[u8], index_bytes: &[u8]) -> Result<Self> {
    let mut manifests = HashMap::new();
    if !manifest_bytes.is_empty() {
      let mut r = Reader::new(manifest_bytes);
      let count = r.read_u32()?;
      for _ in 0..count {
        let prop_key_id = r.read_u32()?;
        manifests.insert(prop_key_id, VectorManifest::decode(&mut r)?);
      }
    }

    let mut indices = HashMap::new();
    if !index_bytes.is_empty() {
      let mut r = Reader::new(index_bytes);
      let count = r.read_u32()?;
      for _ in 0..count {
        let prop_key_id = r.read_u32()?;
        indices.insert(prop_key_id, IvfIndex::decode(&mut r)?);
      }
    }

    Ok(Self { manifests, indices })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn add_vector_creates_manifest_on_first_use() {
    let mut store = VectorStore::new();
    store.add_vector(1, 10, &[1.0, 0.0], DistanceMetric::Euclidean).unwrap();
    assert_eq!(store.dimensions_of(1), Some(2));
  }

  #[test]
  fn search_before_build_index_fails() {
    let mut store = VectorStore::new();
    store.add_vector(1, 10, &[1.0, 0.0], DistanceMetric::Euclidean).unwrap();
    let err = store.search(1, &[1.0, 0.0], 1, 1, None).unwrap_err();
    assert!(matches!(err, RayError::IndexNotTrained));
  }

  #[test]
  fn build_index_and_search_round_trips_to_node_id() {
    let mut store = VectorStore::new();
    for i in 0..6u32 {
      let coord = i as f32 * 10.0;
      store.add_vector(1, i, &[coord, coord], DistanceMetric::Euclidean).unwrap();
    }
    store.build_index(1, 2, 20, Some(7)).unwrap();
    let hits = store.search(1, &[0.0, 0.0], 1, 2, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].node_id, 0);
  }

  #[test]
  fn delete_after_index_build_excludes_from_search() {
    let mut store = VectorStore::new();
    for i in 0..6u32 {
      let coord = i as f32 * 10.0;
      store.add_vector(1, i, &[coord, coord], DistanceMetric::Euclidean).unwrap();
    }
    store.build_index(1, 2, 20, Some(7)).unwrap();
    store.delete_vector(1, 0).unwrap();
    let hits = store.search(1, &[0.0, 0.0], 6, 2, None).unwrap();
    assert!(hits.iter().all(|h| h.node_id != 0));
  }

  #[test]
  fn roundtrip_encode_decode() {
    let mut store = VectorStore::new();
    store.add_vector(1, 10, &[1.0, 0.0], DistanceMetric::Euclidean).unwrap();
    store.add_vector(2, 20, &[0.0, 1.0, 0.0], DistanceMetric::Cosine).unwrap();

    let manifest_bytes = store.encode_manifests();
    let index_bytes = store.encode_indices();
    let decoded = VectorStore::decode(&manifest_bytes, &index_bytes).unwrap();
    assert_eq!(decoded.dimensions_of(1), Some(2));
    assert_eq!(decoded.dimensions_of(2), Some(3));
  }
}
