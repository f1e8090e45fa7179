//! Merged snapshot ∪ delta iteration under a visibility view (spec.md §4.6).

use crate::core::delta::Delta;
use crate::core::snapshot::reader::SnapshotData;
use crate::error::Result;
use crate::types::{ETypeId, NodeId};
use std::collections::HashSet;

/// A read-only view composing one snapshot generation with the delta
/// overlaid on top of it. Does not itself apply MVCC visibility filtering
/// beyond node/edge existence — callers holding a transaction snapshot
/// timestamp layer version-chain checks on top (see `crate::mvcc`).
pub struct MergedView<'a> {
  snapshot: &'a SnapshotData,
  delta: &'a Delta,
}

impl<'a> MergedView<'a> {
  pub fn new(snapshot: &'a SnapshotData, delta: &'a Delta) -> Self {
    Self { snapshot, delta }
  }

  pub fn node_exists(&self, node_id: NodeId) -> bool {
    if self.delta.is_node_deleted(node_id) {
      return false;
    }
    if self.delta.created_node(node_id).is_some() {
      return true;
    }
    self.snapshot.phys_of(node_id).is_some()
  }

  pub fn out_edges(&self, src: NodeId) -> Result<MergedEdgeIter<'_>> {
    MergedEdgeIter::new(self, src, Direction::Out)
  }

  pub fn in_edges(&self, dst: NodeId) -> Result<MergedEdgeIter<'_>> {
    MergedEdgeIter::new(self, dst, Direction::In)
  }

  pub fn out_degree(&self, src: NodeId) -> Result<usize> {
    Ok(self.out_edges(src)?.count())
  }

  pub fn in_degree(&self, dst: NodeId) -> Result<usize> {
    Ok(self.in_edges(dst)?.count())
  }

  /// Edge existence, checked in the order spec.md §4.6 prescribes: node
  /// visibility, delta tombstone, delta addition, snapshot binary search.
  pub fn has_edge(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> Result<bool> {
    if !self.node_exists(src) || !self.node_exists(dst) {
      return Ok(false);
    }
    if self.delta.out_del_contains(src, etype, dst) {
      return Ok(false);
    }
    if self.delta.out_add_contains(src, etype, dst) {
      return Ok(true);
    }
    let (Some(src_phys), Some(dst_phys)) = (self.snapshot.phys_of(src), self.snapshot.phys_of(dst)) else {
      return Ok(false);
    };
    self.snapshot.has_edge(src_phys, etype, dst_phys)
  }
}

#[derive(Clone, Copy)]
enum Direction {
  Out,
  In,
}

enum Phase {
  Snapshot(usize),
  Delta,
  Done,
}

/// Lazy, pull-based, non-restartable iterator over one node's merged
/// neighbour set. Yields `(etype, other_node)` pairs with no duplicates.
pub struct MergedEdgeIter<'a> {
  view: &'a MergedView<'a>,
  node: NodeId,
  direction: Direction,
  snapshot_edges: Vec<(ETypeId, NodeId)>,
  delta_adds: Vec<(ETypeId, NodeId)>,
  delta_idx: usize,
  seen: HashSet<(ETypeId, NodeId)>,
  phase: Phase,
}

impl<'a> MergedEdgeIter<'a> {
  fn new(view: &'a MergedView<'a>, node: NodeId, direction: Direction) -> Result<Self> {
    let snapshot_edges = match (direction, view.snapshot.phys_of(node)) {
      (Direction::Out, Some(phys)) => view
        .snapshot
        .out_edges_of(phys)?
        .into_iter()
        .map(|(etype, dst_phys)| Ok((etype, view.snapshot.node_id_of(dst_phys)?)))
        .collect::<Result<Vec<_>>>()?,
      (Direction::In, Some(phys)) => view
        .snapshot
        .in_edges_of(phys)?
        .into_iter()
        .map(|(etype, src_phys)| Ok((etype, view.snapshot.node_id_of(src_phys)?)))
        .collect::<Result<Vec<_>>>()?,
      (_, None) => Vec::new(),
    };
    let delta_adds: Vec<(ETypeId, NodeId)> = match direction {
      Direction::Out => view.delta.out_added(node).copied().collect(),
      Direction::In => view.delta.in_added(node).copied().collect(),
    };
    Ok(Self {
      view,
      node,
      direction,
      snapshot_edges,
      delta_adds,
      delta_idx: 0,
      seen: HashSet::new(),
      phase: Phase::Snapshot(0),
    })
  }

  fn is_tombstoned(&self, etype: ETypeId, other: NodeId) -> bool {
    match self.direction {
      Direction::Out => self.view.delta.out_del_contains(self.node, etype, other),
      Direction::In => self.view.delta.in_del_contains(self.node, etype, other),
    }
  }
}

impl<'a> Iterator for MergedEdgeIter<'a> {
  type Item = (ETypeId, NodeId);

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      match self.phase {
        Phase::Snapshot(idx) => {
          if idx >= self.snapshot_edges.len() {
            self.phase = Phase::Delta;
            continue;
          }
          self.phase = Phase::Snapshot(idx + 1);
          let (etype, other) = self.snapshot_edges[idx];
          if self.is_tombstoned(etype, other) {
            continue;
          }
          if !self.view.node_exists(other) {
            continue;
          }
          if !self.seen.insert((etype, other)) {
            continue;
          }
          return Some((etype, other));
        }
        Phase::Delta => {
          if self.delta_idx >= self.delta_adds.len() {
            self.phase = Phase::Done;
            continue;
          }
          let (etype, other) = self.delta_adds[self.delta_idx];
          self.delta_idx += 1;
          if !self.view.node_exists(other) {
            continue;
          }
          if !self.seen.insert((etype, other)) {
            continue;
          }
          return Some((etype, other));
        }
        Phase::Done => return None,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::snapshot::model::{NodeRecord, SnapshotModel};
  use crate::core::snapshot::writer::write_snapshot;
  use tempfile::tempdir;

  fn empty_model() -> SnapshotModel {
    SnapshotModel {
      generation: 0,
      strings: vec![],
      labels: vec![],
      etypes: vec![0], // one defined etype, string id unused by the reader's edge paths
      propkeys: vec![],
      nodes: vec![
        NodeRecord { node_id: 1, key: None, labels: vec![], props: vec![], out_edges: vec![(1, 2)] },
        NodeRecord { node_id: 2, key: None, labels: vec![], props: vec![], out_edges: vec![] },
      ],
      edge_props: vec![],
      vector_manifest: vec![],
      vector_fragments: vec![],
      vector_index: vec![],
      vector_node_map: vec![],
    }
  }

  #[test]
  fn merged_view_adds_delta_edge_not_in_snapshot() {
    let dir = tempdir().unwrap();
    write_snapshot(dir.path(), &empty_model()).unwrap();
    let snap = SnapshotData::open(&dir.path().join("current.bin")).unwrap();
    let mut delta = Delta::new();
    delta.create_node(3, None, vec![]);
    delta.add_edge(1, 1, 3);

    let view = MergedView::new(&snap, &delta);
    let out: Vec<_> = view.out_edges(1).unwrap().collect();
    assert!(out.contains(&(1, 2)));
    assert!(out.contains(&(1, 3)));
    assert!(view.has_edge(1, 1, 3).unwrap());
  }

  #[test]
  fn merged_view_hides_tombstoned_snapshot_edge() {
    let dir = tempdir().unwrap();
    write_snapshot(dir.path(), &empty_model()).unwrap();
    let snap = SnapshotData::open(&dir.path().join("current.bin")).unwrap();
    let mut delta = Delta::new();
    delta.del_edge(1, 1, 2);

    let view = MergedView::new(&snap, &delta);
    let out: Vec<_> = view.out_edges(1).unwrap().collect();
    assert!(out.is_empty());
    assert!(!view.has_edge(1, 1, 2).unwrap());
  }

  #[test]
  fn deleted_destination_node_hides_edge_even_without_tombstone() {
    let dir = tempdir().unwrap();
    write_snapshot(dir.path(), &empty_model()).unwrap();
    let snap = SnapshotData::open(&dir.path().join("current.bin")).unwrap();
    let mut delta = Delta::new();
    delta.delete_node(2);

    let view = MergedView::new(&snap, &delta);
    let out: Vec<_> = view.out_edges(1).unwrap().collect();
    assert!(out.is_empty());
  }
}
