//! In-memory overlay of mutations not yet absorbed by a snapshot (spec.md §3, §4.2).

use crate::constants::DELTA_SET_UPGRADE_THRESHOLD;
use crate::types::{EdgeKey, ETypeId, LabelId, NodeId, PropKeyId, PropValue};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// A node created in this delta epoch, not yet present in any snapshot.
#[derive(Debug, Clone)]
pub struct CreatedNode {
  pub key: Option<String>,
  pub labels: Vec<LabelId>,
}

/// A `(etype, other)` patch set for one node's out- or in-adjacency.
/// Starts as a linear `Vec`; upgrades to a `HashSet` past
/// `DELTA_SET_UPGRADE_THRESHOLD` entries (spec.md §9, open question 3).
#[derive(Debug)]
enum EdgePatchSet {
  Small(Vec<(ETypeId, NodeId)>),
  Large(HashSet<(ETypeId, NodeId)>),
}

impl EdgePatchSet {
  fn new() -> Self {
    EdgePatchSet::Small(Vec::new())
  }

  fn insert(&mut self, pair: (ETypeId, NodeId)) -> bool {
    match self {
      EdgePatchSet::Small(v) => {
        if v.contains(&pair) {
          return false;
        }
        v.push(pair);
        if v.len() > DELTA_SET_UPGRADE_THRESHOLD {
          let set: HashSet<_> = v.drain(..).collect();
          *self = EdgePatchSet::Large(set);
          if let EdgePatchSet::Large(s) = self {
            s.insert(pair);
          }
        }
        true
      }
      EdgePatchSet::Large(s) => s.insert(pair),
    }
  }

  fn remove(&mut self, pair: &(ETypeId, NodeId)) -> bool {
    match self {
      EdgePatchSet::Small(v) => {
        if let Some(idx) = v.iter().position(|p| p == pair) {
          v.remove(idx);
          true
        } else {
          false
        }
      }
      EdgePatchSet::Large(s) => s.remove(pair),
    }
  }

  fn contains(&self, pair: &(ETypeId, NodeId)) -> bool {
    match self {
      EdgePatchSet::Small(v) => v.contains(pair),
      EdgePatchSet::Large(s) => s.contains(pair),
    }
  }

  fn retain(&mut self, mut keep: impl FnMut(&(ETypeId, NodeId)) -> bool) {
    match self {
      EdgePatchSet::Small(v) => v.retain(|p| keep(p)),
      EdgePatchSet::Large(s) => s.retain(|p| keep(p)),
    }
  }

  fn is_empty(&self) -> bool {
    match self {
      EdgePatchSet::Small(v) => v.is_empty(),
      EdgePatchSet::Large(s) => s.is_empty(),
    }
  }

  pub fn iter(&self) -> Box<dyn Iterator<Item = &(ETypeId, NodeId)> + '_> {
    match self {
      EdgePatchSet::Small(v) => Box::new(v.iter()),
      EdgePatchSet::Large(s) => Box::new(s.iter()),
    }
  }
}

/// The write-side overlay: everything committed since the last compaction,
/// protected by the writer lock. Readers consult it without mutating it.
#[derive(Default)]
pub struct Delta {
  pub deleted_nodes: HashSet<NodeId>,
  pub created_nodes: HashMap<NodeId, CreatedNode>,
  pub key_index: HashMap<String, NodeId>,

  out_add: HashMap<NodeId, EdgePatchSet>,
  out_del: HashMap<NodeId, EdgePatchSet>,
  in_add: HashMap<NodeId, EdgePatchSet>,
  in_del: HashMap<NodeId, EdgePatchSet>,

  pub node_props: HashMap<(NodeId, PropKeyId), Option<PropValue>>,
  pub edge_props: HashMap<(EdgeKey, PropKeyId), Option<PropValue>>,

  /// Newly defined names with no snapshot id yet, in definition order so
  /// the compactor can assign contiguous new ids deterministically.
  pub new_labels: IndexMap<String, LabelId>,
  pub new_etypes: IndexMap<String, ETypeId>,
  pub new_propkeys: IndexMap<String, PropKeyId>,

  /// Count of mutating operations applied since the last reset; the
  /// compactor's trigger threshold is compared against this.
  pub op_count: usize,
}

impl Delta {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_node_deleted(&self, node_id: NodeId) -> bool {
    self.deleted_nodes.contains(&node_id)
  }

  pub fn created_node(&self, node_id: NodeId) -> Option<&CreatedNode> {
    self.created_nodes.get(&node_id)
  }

  pub fn create_node(&mut self, node_id: NodeId, key: Option<String>, labels: Vec<LabelId>) {
    if let Some(k) = &key {
      self.key_index.insert(k.clone(), node_id);
    }
    self.created_nodes.insert(node_id, CreatedNode { key, labels });
    self.op_count += 1;
  }

  /// True if `key` is already claimed by a node created in this delta.
  pub fn key_taken(&self, key: &str) -> bool {
    self.key_index.contains_key(key)
  }

  pub fn delete_node(&mut self, node_id: NodeId) {
    if let Some(created) = self.created_nodes.remove(&node_id) {
      if let Some(k) = &created.key {
        self.key_index.remove(k.as_str());
      }
    } else {
      self.deleted_nodes.insert(node_id);
    }
    self.purge_node(node_id);
    self.op_count += 1;
  }

  fn purge_node(&mut self, node_id: NodeId) {
    self.out_add.remove(&node_id);
    self.out_del.remove(&node_id);
    self.in_add.remove(&node_id);
    self.in_del.remove(&node_id);

    for map in [&mut self.out_add, &mut self.out_del] {
      for set in map.values_mut() {
        set.retain(|(_, other)| *other != node_id);
      }
      map.retain(|_, set| !set.is_empty());
    }
    for map in [&mut self.in_add, &mut self.in_del] {
      for set in map.values_mut() {
        set.retain(|(_, other)| *other != node_id);
      }
      map.retain(|_, set| !set.is_empty());
    }

    self.node_props.retain(|(n, _), _| *n != node_id);
    self
      .edge_props
      .retain(|(k, _), _| k.src != node_id && k.dst != node_id);
  }

  /// `addEdge` then `delEdge` on the same triple cancels (spec.md §4.2);
  /// `delEdge` then `addEdge` cancels a previously recorded tombstone.
  pub fn add_edge(&mut self, src: NodeId, etype: ETypeId, dst: NodeId) {
    let out_pair = (etype, dst);
    if !patch_remove(&mut self.out_del, src, &out_pair) {
      patch_insert(&mut self.out_add, src, out_pair);
    }
    let in_pair = (etype, src);
    if !patch_remove(&mut self.in_del, dst, &in_pair) {
      patch_insert(&mut self.in_add, dst, in_pair);
    }
    self.op_count += 1;
  }

  pub fn del_edge(&mut self, src: NodeId, etype: ETypeId, dst: NodeId) {
    let out_pair = (etype, dst);
    if !patch_remove(&mut self.out_add, src, &out_pair) {
      patch_insert(&mut self.out_del, src, out_pair);
    }
    let in_pair = (etype, src);
    if !patch_remove(&mut self.in_add, dst, &in_pair) {
      patch_insert(&mut self.in_del, dst, in_pair);
    }
    self.edge_props.retain(|k, _| {
      !(k.src == src && k.etype == etype && k.dst == dst)
    });
    self.op_count += 1;
  }

  pub fn out_added(&self, src: NodeId) -> Box<dyn Iterator<Item = &(ETypeId, NodeId)> + '_> {
    self
      .out_add
      .get(&src)
      .map(|s| s.iter())
      .unwrap_or_else(|| Box::new(std::iter::empty()))
  }
  pub fn in_added(&self, dst: NodeId) -> Box<dyn Iterator<Item = &(ETypeId, NodeId)> + '_> {
    self
      .in_add
      .get(&dst)
      .map(|s| s.iter())
      .unwrap_or_else(|| Box::new(std::iter::empty()))
  }

  pub fn out_add_contains(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
    self
      .out_add
      .get(&src)
      .map(|s| s.contains(&(etype, dst)))
      .unwrap_or(false)
  }
  pub fn out_del_contains(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
    self
      .out_del
      .get(&src)
      .map(|s| s.contains(&(etype, dst)))
      .unwrap_or(false)
  }
  pub fn in_del_contains(&self, dst: NodeId, etype: ETypeId, src: NodeId) -> bool {
    self
      .in_del
      .get(&dst)
      .map(|s| s.contains(&(etype, src)))
      .unwrap_or(false)
  }

  pub fn set_node_prop(&mut self, node: NodeId, key: PropKeyId, value: PropValue) {
    self.node_props.insert((node, key), Some(value));
    self.op_count += 1;
  }
  pub fn del_node_prop(&mut self, node: NodeId, key: PropKeyId) {
    self.node_props.insert((node, key), None);
    self.op_count += 1;
  }
  pub fn node_prop_patch(&self, node: NodeId, key: PropKeyId) -> Option<&Option<PropValue>> {
    self.node_props.get(&(node, key))
  }

  pub fn set_edge_prop(&mut self, edge: EdgeKey, key: PropKeyId, value: PropValue) {
    self.edge_props.insert((edge, key), Some(value));
    self.op_count += 1;
  }
  pub fn del_edge_prop(&mut self, edge: EdgeKey, key: PropKeyId) {
    self.edge_props.insert((edge, key), None);
    self.op_count += 1;
  }
  pub fn edge_prop_patch(&self, edge: EdgeKey, key: PropKeyId) -> Option<&Option<PropValue>> {
    self.edge_props.get(&(edge, key))
  }

  pub fn lookup_new_label(&self, name: &str) -> Option<LabelId> {
    self.new_labels.get(name).copied()
  }
  pub fn lookup_new_etype(&self, name: &str) -> Option<ETypeId> {
    self.new_etypes.get(name).copied()
  }
  pub fn lookup_new_propkey(&self, name: &str) -> Option<PropKeyId> {
    self.new_propkeys.get(name).copied()
  }
  pub fn record_new_label(&mut self, name: &str, id: LabelId) {
    self.new_labels.insert(name.to_string(), id);
  }
  pub fn record_new_etype(&mut self, name: &str, id: ETypeId) {
    self.new_etypes.insert(name.to_string(), id);
  }
  pub fn record_new_propkey(&mut self, name: &str, id: PropKeyId) {
    self.new_propkeys.insert(name.to_string(), id);
  }

  /// Drop all overlay state. Called by the compactor once the merged view
  /// has been durably written as a new snapshot (spec.md §4.4 step 7).
  pub fn reset(&mut self) {
    *self = Delta::default();
  }

  pub fn is_empty(&self) -> bool {
    self.op_count == 0
  }
}

fn patch_insert(map: &mut HashMap<NodeId, EdgePatchSet>, key: NodeId, pair: (ETypeId, NodeId)) {
  map.entry(key).or_insert_with(EdgePatchSet::new).insert(pair);
}

fn patch_remove(map: &mut HashMap<NodeId, EdgePatchSet>, key: NodeId, pair: &(ETypeId, NodeId)) -> bool {
  if let Some(set) = map.get_mut(&key) {
    let removed = set.remove(pair);
    if set.is_empty() {
      map.remove(&key);
    }
    removed
  } else {
    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn add_then_del_cancels() {
    let mut d = Delta::new();
    d.add_edge(1, 1, 2);
    assert!(d.out_add_contains(1, 1, 2));
    d.del_edge(1, 1, 2);
    assert!(!d.out_add_contains(1, 1, 2));
    assert!(!d.out_del_contains(1, 1, 2));
  }

  #[test]
  fn del_then_add_cancels_tombstone() {
    let mut d = Delta::new();
    d.del_edge(1, 1, 2);
    assert!(d.out_del_contains(1, 1, 2));
    d.add_edge(1, 1, 2);
    assert!(!d.out_del_contains(1, 1, 2));
    assert!(!d.out_add_contains(1, 1, 2));
  }

  #[test]
  fn create_then_delete_collapses() {
    let mut d = Delta::new();
    d.create_node(5, Some("a".into()), vec![]);
    assert!(d.key_taken("a"));
    d.delete_node(5);
    assert!(d.created_node(5).is_none());
    assert!(!d.key_taken("a"));
    assert!(d.deleted_nodes.is_empty());
  }

  #[test]
  fn delete_snapshot_node_purges_patches() {
    let mut d = Delta::new();
    d.add_edge(10, 1, 20);
    d.set_node_prop(10, 1, PropValue::Int(5));
    d.delete_node(10);
    assert!(d.is_node_deleted(10));
    assert!(!d.out_add_contains(10, 1, 20));
    assert!(d.node_prop_patch(10, 1).is_none());
  }

  #[test]
  fn edge_patch_set_upgrades_past_threshold() {
    let mut d = Delta::new();
    for i in 0..(DELTA_SET_UPGRADE_THRESHOLD as u32 + 10) {
      d.add_edge(1, 1, i + 100);
    }
    assert!(d.out_add_contains(1, 1, 105));
    assert!(d.out_add_contains(1, 1, 100 + DELTA_SET_UPGRADE_THRESHOLD as u32 + 9));
  }
}
