//! Inverted-file (IVF) approximate nearest-neighbor index (spec.md §4.7
//! "IVF training", "IVF insert/delete", "IVF search").

pub mod kmeans;

use crate::error::{RayError, Result};
use crate::types::{DistanceMetric, VectorId};
use crate::util::binary::{write_u32, write_u64, write_u8, Reader};
use crate::vector::distance::{cosine_distance, dot_product, euclidean_distance, normalize};
use kmeans::{kmeans, KMeansConfig};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

pub struct SearchResult {
  pub vector_id: VectorId,
  pub distance: f32,
  pub similarity: f32,
}

/// `1 - cosine_distance`, `-dot_distance`, `1 / (1 + euclidean_distance)`:
/// the "closer to 1 is more similar" scale the public API reports.
pub fn distance_to_similarity(distance: f32, metric: DistanceMetric) -> f32 {
  match metric {
    DistanceMetric::Cosine => 1.0 - distance,
    DistanceMetric::Dot => -distance,
    DistanceMetric::Euclidean => 1.0 / (1.0 + distance),
  }
}

fn negated_dot(a: &[f32], b: &[f32]) -> f32 {
  -dot_product(a, b)
}

fn metric_distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
  match metric {
    DistanceMetric::Cosine => cosine_distance(a, b),
    DistanceMetric::Euclidean => euclidean_distance(a, b),
    DistanceMetric::Dot => negated_dot(a, b),
  }
}

fn distance_fn_for(metric: DistanceMetric) -> fn(&[f32], &[f32]) -> f32 {
  match metric {
    DistanceMetric::Cosine => cosine_distance,
    DistanceMetric::Euclidean => euclidean_distance,
    DistanceMetric::Dot => negated_dot,
  }
}

/// One propkey's IVF index: `nClusters` centroids plus one inverted list per
/// cluster. `trained = false` rejects insert/delete/search (spec.md §4.7).
pub struct IvfIndex {
  dimensions: usize,
  metric: DistanceMetric,
  n_clusters: usize,
  centroids: Vec<f32>,
  inverted_lists: Vec<Vec<VectorId>>,
  trained: bool,
  training_buffer: Vec<f32>,
  training_count: usize,
}

impl IvfIndex {
  pub fn new(dimensions: usize, metric: DistanceMetric, n_clusters: usize) -> Self {
    Self {
      dimensions,
      metric,
      n_clusters,
      centroids: Vec::new(),
      inverted_lists: Vec::new(),
      trained: false,
      training_buffer: Vec::new(),
      training_count: 0,
    }
  }

  pub fn is_trained(&self) -> bool {
    self.trained
  }

  pub fn add_training(&mut self, vector: &[f32]) -> Result<()> {
    if vector.len() != self.dimensions {
      return Err(RayError::DimensionMismatch {
        expected: self.dimensions,
        got: vector.len(),
      });
    }
    self.training_buffer.extend_from_slice(vector);
    self.training_count += 1;
    Ok(())
  }

  /// Train via k-means++ init and Lloyd's algorithm, then discard the
  /// training buffer (spec.md §4.7 "IVF training").
  pub fn train(&mut self, max_iterations: usize, seed: Option<u64>) -> Result<()> {
    if self.training_count < self.n_clusters {
      return Err(RayError::InvalidArgument(format!(
        "not enough training vectors: {} < {} clusters",
        self.training_count, self.n_clusters
      )));
    }
    let mut config = KMeansConfig::new(self.n_clusters).with_max_iterations(max_iterations);
    if let Some(s) = seed {
      config = config.with_seed(s);
    }
    let result = kmeans(
      &self.training_buffer,
      self.training_count,
      self.dimensions,
      &config,
      distance_fn_for(self.metric),
    )
    .map_err(|e| RayError::InvalidArgument(e.to_string()))?;

    let mut centroids = result.centroids;
    if matches!(self.metric, DistanceMetric::Cosine) {
      for c in centroids.chunks_mut(self.dimensions) {
        let n = normalize(c);
        c.copy_from_slice(&n);
      }
    }

    self.centroids = centroids;
    self.inverted_lists = vec![Vec::new(); self.n_clusters];
    self.trained = true;
    self.training_buffer.clear();
    self.training_count = 0;
    Ok(())
  }

  fn centroid(&self, cluster: usize) -> &[f32] {
    let offset = cluster * self.dimensions;
    &self.centroids[offset..offset + self.dimensions]
  }

  fn nearest_centroid(&self, vector: &[f32]) -> usize {
    let dist_fn = distance_fn_for(self.metric);
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for c in 0..self.n_clusters {
      let d = dist_fn(vector, self.centroid(c));
      if d < best_dist {
        best_dist = d;
        best = c;
      }
    }
    best
  }

  fn require_trained(&self) -> Result<()> {
    if self.trained {
      Ok(())
    } else {
      Err(RayError::IndexNotTrained)
    }
  }

  /// Assign `vector` to its nearest centroid's inverted list.
  pub fn insert(&mut self, vector_id: VectorId, vector: &[f32]) -> Result<()> {
    self.require_trained()?;
    if vector.len() != self.dimensions {
      return Err(RayError::DimensionMismatch {
        expected: self.dimensions,
        got: vector.len(),
      });
    }
    let cluster = self.nearest_centroid(vector);
    self.inverted_lists[cluster].push(vector_id);
    Ok(())
  }

  /// Recompute `vector`'s nearest centroid and swap-remove `vector_id` from
  /// that list. Returns `false` if it was not present there.
  pub fn delete(&mut self, vector_id: VectorId, vector: &[f32]) -> Result<bool> {
    self.require_trained()?;
    let cluster = self.nearest_centroid(vector);
    let list = &mut self.inverted_lists[cluster];
    match list.iter().position(|&id| id == vector_id) {
      Some(pos) => {
        list.swap_remove(pos);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  /// Probe the `nProbe` nearest clusters and return the `k` nearest live
  /// vectors, sorted ascending by distance. `resolve` returns `None` for a
  /// tombstoned or otherwise invisible vector id.
  pub fn search(
    &self,
    query: &[f32],
    k: usize,
    n_probe: usize,
    filter: Option<&dyn Fn(VectorId) -> bool>,
    mut resolve: impl FnMut(VectorId) -> Option<Vec<f32>>,
  ) -> Result<Vec<SearchResult>> {
    self.require_trained()?;
    if query.is_empty() {
      return Err(RayError::InvalidArgument("empty query vector".into()));
    }
    if query.len() != self.dimensions {
      return Err(RayError::DimensionMismatch {
        expected: self.dimensions,
        got: query.len(),
      });
    }

    let normalized;
    let query = if matches!(self.metric, DistanceMetric::Cosine) {
      normalized = normalize(query);
      normalized.as_slice()
    } else {
      query
    };

    let mut cluster_order: Vec<(usize, f32)> = (0..self.n_clusters)
      .map(|c| (c, metric_distance(self.metric, query, self.centroid(c))))
      .collect();
    cluster_order.sort_by(|a, b| a.1.total_cmp(&b.1));
    let probe = n_probe.clamp(1, self.n_clusters);

    let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
    for &(cluster, _) in cluster_order.iter().take(probe) {
      for &vid in &self.inverted_lists[cluster] {
        if let Some(f) = filter {
          if !f(vid) {
            continue;
          }
        }
        let Some(vector) = resolve(vid) else { continue };
        let distance = metric_distance(self.metric, query, &vector);
        if heap.len() < k {
          heap.push(HeapEntry { vector_id: vid, distance });
        } else if let Some(top) = heap.peek() {
          if distance < top.distance {
            heap.pop();
            heap.push(HeapEntry { vector_id: vid, distance });
          }
        }
      }
    }

    let results: Vec<SearchResult> = heap
      .into_sorted_vec()
      .into_iter()
      .map(|e| SearchResult {
        vector_id: e.vector_id,
        distance: e.distance,
        similarity: distance_to_similarity(e.distance, self.metric),
      })
      .collect();
    Ok(results)
  }

  pub fn encode(&self, buf: &mut Vec<u8>) {
    write_u32(buf, self.dimensions as u32);
    write_u8(buf, self.metric as u8);
    write_u32(buf, self.n_clusters as u32);
    write_u8(buf, if self.trained { 1 } else { 0 });
    write_u32(buf, self.centroids.len() as u32);
    for v in &self.centroids {
      buf.extend_from_slice(&v.to_le_bytes());
    }
    write_u32(buf, self.inverted_lists.len() as u32);
    for list in &self.inverted_lists {
      write_u32(buf, list.len() as u32);
      for &vid in list {
        write_u64(buf, vid);
      }
    }
  }

  pub fn decode(r: &mut Reader) -> Result<Self> {
    let dimensions = r.read_u32()? as usize;
    let metric = distance_metric_from_u8(r.read_u8()?);
    let n_clusters = r.read_u32()? as usize;
    let trained = r.read_u8()? != 0;
    let centroid_len = r.read_u32()? as usize;
    let mut centroids = Vec::with_capacity(centroid_len);
    for _ in 0..centroid_len {
      centroids.push(r.read_f32()?);
    }
    let list_count = r.read_u32()? as usize;
    let mut inverted_lists = Vec::with_capacity(list_count);
    for _ in 0..list_count {
      let len = r.read_u32()? as usize;
      let mut list = Vec::with_capacity(len);
      for _ in 0..len {
        list.push(r.read_u64()?);
      }
      inverted_lists.push(list);
    }
    Ok(Self {
      dimensions,
      metric,
      n_clusters,
      centroids,
      inverted_lists,
      trained,
      training_buffer: Vec::new(),
      training_count: 0,
    })
  }
}

fn distance_metric_from_u8(v: u8) -> DistanceMetric {
  match v {
    1 => DistanceMetric::Euclidean,
    2 => DistanceMetric::Dot,
    _ => DistanceMetric::Cosine,
  }
}

#[derive(Debug, Clone)]
struct HeapEntry {
  vector_id: VectorId,
  distance: f32,
}

impl PartialEq for HeapEntry {
  fn eq(&self, other: &Self) -> bool {
    self.distance == other.distance
  }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}
impl Ord for HeapEntry {
  fn cmp(&self, other: &Self) -> Ordering {
    self.distance.total_cmp(&other.distance)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn trained_index() -> IvfIndex {
    let mut idx = IvfIndex::new(2, DistanceMetric::Euclidean, 2);
    for _ in 0..5 {
      idx.add_training(&[0.0, 0.0]).unwrap();
    }
    for _ in 0..5 {
      idx.add_training(&[10.0, 10.0]).unwrap();
    }
    idx.train(20, Some(42)).unwrap();
    idx
  }

  #[test]
  fn operations_before_training_fail() {
    let mut idx = IvfIndex::new(2, DistanceMetric::Euclidean, 2);
    assert!(matches!(idx.insert(1, &[0.0, 0.0]), Err(RayError::IndexNotTrained)));
    assert!(matches!(idx.delete(1, &[0.0, 0.0]), Err(RayError::IndexNotTrained)));
    assert!(matches!(
      idx.search(&[0.0, 0.0], 1, 1, None, |_| None),
      Err(RayError::IndexNotTrained)
    ));
  }

  #[test]
  fn insert_and_search_finds_nearest_cluster() {
    let mut idx = trained_index();
    idx.insert(1, &[0.1, 0.1]).unwrap();
    idx.insert(2, &[10.1, 10.1]).unwrap();

    let store = std::collections::HashMap::from([(1u64, vec![0.1f32, 0.1]), (2u64, vec![10.1, 10.1])]);
    let results = idx
      .search(&[0.0, 0.0], 1, 2, None, |vid| store.get(&vid).cloned())
      .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].vector_id, 1);
  }

  #[test]
  fn delete_removes_from_inverted_list() {
    let mut idx = trained_index();
    idx.insert(1, &[0.1, 0.1]).unwrap();
    assert!(idx.delete(1, &[0.1, 0.1]).unwrap());
    assert!(!idx.delete(1, &[0.1, 0.1]).unwrap());
  }

  #[test]
  fn search_rejects_wrong_dimension_query() {
    let idx = trained_index();
    let err = idx.search(&[0.0, 0.0, 0.0], 1, 1, None, |_| None).unwrap_err();
    assert!(matches!(err, RayError::DimensionMismatch { .. }));
  }

  #[test]
  fn roundtrip_encode_decode() {
    let mut idx = trained_index();
    idx.insert(1, &[0.1, 0.1]).unwrap();
    let mut buf = Vec::new();
    idx.encode(&mut buf);
    let mut r = Reader::new(&buf);
    let decoded = IvfIndex::decode(&mut r).unwrap();
    assert!(decoded.is_trained());
    assert_eq!(decoded.centroids.len(), idx.centroids.len());
    assert_eq!(decoded.inverted_lists.len(), idx.inverted_lists.len());
  }
}
