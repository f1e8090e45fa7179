//! Merges a snapshot with the delta overlaid on top of it into a new
//! snapshot generation (spec.md §4.4).
//!
//! Dictionary ids (labels/etypes/propkeys) are kept stable across
//! compaction; only the underlying string arena is rebuilt. An id whose
//! name is never referenced by a surviving record is still kept, so
//! `stats()` counts stay consistent run over run (spec.md §4.4 "Edge cases").

use crate::core::delta::Delta;
use crate::core::snapshot::model::{NodeRecord, SnapshotModel};
use crate::core::snapshot::reader::SnapshotData;
use crate::core::snapshot::writer::write_snapshot;
use crate::core::wal::{truncate_through, wal_dir};
use crate::error::Result;
use crate::types::{EdgeKey, ETypeId, NodeId, PropKeyId, PropValue};
use crate::vector::VectorStore;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub struct CompactionResult {
  pub path: PathBuf,
  pub generation: u64,
}

/// Merge `snapshot` (absent for the very first compaction) with `delta`,
/// write the result as `new_generation`, reset `delta`, and truncate the WAL
/// through `through_wal_segment`. Caller holds the write barrier for the
/// duration (spec.md §4.4 step 1). `vectors` is the store's live, mutated
/// `VectorStore` — its manifests and IVF indices are re-encoded in full into
/// the new snapshot (spec.md §4.4 step 5), not copied from the prior
/// snapshot's bytes, since vector writes since the last compaction only ever
/// reach `vectors`, never the old snapshot file.
pub fn compact(
  data_dir: &Path,
  snapshot: Option<&SnapshotData>,
  delta: &mut Delta,
  vectors: &VectorStore,
  new_generation: u64,
  through_wal_segment: Option<u64>,
) -> Result<CompactionResult> {
  let mut strings: Vec<String> = Vec::new();
  let mut intern_index: HashMap<String, u32> = HashMap::new();

  let (max_label, max_etype, max_propkey) = match snapshot {
    Some(s) => (s.max_label_id()?, s.max_etype_id()?, s.max_propkey_id()?),
    None => (0, 0, 0),
  };
  let labels = merge_dict(max_label, |id| dict_lookup(snapshot, id, SnapshotData::label_name), &delta.new_labels)?;
  let etypes = merge_dict(max_etype, |id| dict_lookup(snapshot, id, SnapshotData::etype_name), &delta.new_etypes)?;
  let propkeys = merge_dict(max_propkey, |id| dict_lookup(snapshot, id, SnapshotData::propkey_name), &delta.new_propkeys)?;

  let labels_section = dict_to_section(&labels, &mut strings, &mut intern_index);
  let etypes_section = dict_to_section(&etypes, &mut strings, &mut intern_index);
  let propkeys_section = dict_to_section(&propkeys, &mut strings, &mut intern_index);

  let mut nodes: Vec<NodeRecord> = Vec::new();

  if let Some(snap) = snapshot {
    for node_id in snap.all_node_ids() {
      if delta.is_node_deleted(node_id) {
        continue;
      }
      let phys = snap.phys_of(node_id).expect("id came from snapshot's own index");
      let key = snap.key_of(phys)?.map(str::to_string);
      if let Some(k) = &key {
        intern(&mut strings, &mut intern_index, k);
      }
      let labels = snap.labels_of(phys)?;

      let mut props: HashMap<PropKeyId, PropValue> = snap.all_node_props(phys)?.into_iter().collect();
      apply_node_prop_patches(delta, node_id, &mut props);

      let mut out_edges = Vec::new();
      let mut seen = HashSet::new();
      for (etype, dst_phys) in snap.out_edges_of(phys)? {
        let dst_id = snap.node_id_of(dst_phys)?;
        if delta.out_del_contains(node_id, etype, dst_id) {
          continue;
        }
        if delta.is_node_deleted(dst_id) {
          continue;
        }
        if seen.insert((etype, dst_id)) {
          out_edges.push((etype, dst_id));
        }
      }
      for (etype, dst_id) in delta.out_added(node_id) {
        if delta.is_node_deleted(*dst_id) {
          continue;
        }
        if seen.insert((*etype, *dst_id)) {
          out_edges.push((*etype, *dst_id));
        }
      }

      nodes.push(NodeRecord {
        node_id,
        key,
        labels,
        props: props.into_iter().collect(),
        out_edges,
      });
    }
  }

  let mut new_ids: Vec<NodeId> = delta.created_nodes.keys().copied().collect();
  new_ids.sort_unstable();
  for node_id in new_ids {
    let created = delta.created_node(node_id).expect("id came from delta.created_nodes");
    if let Some(k) = &created.key {
      intern(&mut strings, &mut intern_index, k);
    }
    let mut props: HashMap<PropKeyId, PropValue> = HashMap::new();
    apply_node_prop_patches(delta, node_id, &mut props);

    let mut out_edges = Vec::new();
    let mut seen = HashSet::new();
    for (etype, dst_id) in delta.out_added(node_id) {
      if delta.is_node_deleted(*dst_id) {
        continue;
      }
      if seen.insert((*etype, *dst_id)) {
        out_edges.push((*etype, *dst_id));
      }
    }

    nodes.push(NodeRecord {
      node_id,
      key: created.key.clone(),
      labels: created.labels.clone(),
      props: props.into_iter().collect(),
      out_edges,
    });
  }

  // Edge properties: old values carried forward for surviving edges, with
  // delta patches applied on top.
  let mut edge_props: Vec<((NodeId, ETypeId, NodeId), Vec<(PropKeyId, PropValue)>)> = Vec::new();
  for n in &nodes {
    for (etype, dst) in &n.out_edges {
      let key = EdgeKey::new(n.node_id, *etype, *dst);
      let mut props: HashMap<PropKeyId, PropValue> = HashMap::new();
      if let Some(snap) = snapshot {
        if let (Some(src_phys), Some(dst_phys)) = (snap.phys_of(n.node_id), snap.phys_of(*dst)) {
          if let Some(loc) = snap.out_edge_flat_index(src_phys, *etype, dst_phys)? {
            for (k, v) in snap.all_edge_props(loc)? {
              props.insert(k, v);
            }
          }
        }
      }
      for ((ek, pkey), patch) in delta.edge_props.iter() {
        if *ek == key {
          match patch {
            Some(v) => {
              props.insert(*pkey, v.clone());
            }
            None => {
              props.remove(pkey);
            }
          }
        }
      }
      if !props.is_empty() {
        edge_props.push(((n.node_id, *etype, *dst), props.into_iter().collect()));
      }
    }
  }

  let model = SnapshotModel {
    generation: new_generation,
    strings,
    labels: labels_section,
    etypes: etypes_section,
    propkeys: propkeys_section,
    nodes,
    edge_props,
    vector_manifest: vectors.encode_manifests(),
    vector_fragments: Vec::new(),
    vector_index: vectors.encode_indices(),
    vector_node_map: Vec::new(),
  };

  let path = write_snapshot(data_dir, &model)?;
  delta.reset();
  if let Some(seg) = through_wal_segment {
    truncate_through(&wal_dir(data_dir), seg)?;
  }

  Ok(CompactionResult {
    path,
    generation: new_generation,
  })
}

fn apply_node_prop_patches(delta: &Delta, node_id: NodeId, props: &mut HashMap<PropKeyId, PropValue>) {
  for ((nid, pkey), patch) in delta.node_props.iter() {
    if *nid == node_id {
      match patch {
        Some(v) => {
          props.insert(*pkey, v.clone());
        }
        None => {
          props.remove(pkey);
        }
      }
    }
  }
}

fn dict_lookup(
  snapshot: Option<&SnapshotData>,
  id: u32,
  lookup: impl Fn(&SnapshotData, u32) -> Result<Option<&str>>,
) -> Result<Option<String>> {
  match snapshot {
    Some(s) => Ok(lookup(s, id)?.map(str::to_string)),
    None => Ok(None),
  }
}

/// Merge old (snapshot) and newly-defined dictionary entries, keyed by id.
fn merge_dict(
  max_old: u32,
  old_name: impl Fn(u32) -> Result<Option<String>>,
  new_entries: &IndexMap<String, u32>,
) -> Result<Vec<(u32, String)>> {
  let mut by_id: HashMap<u32, String> = HashMap::new();
  for id in 1..=max_old {
    if let Some(name) = old_name(id)? {
      by_id.insert(id, name);
    }
  }
  for (name, id) in new_entries {
    by_id.insert(*id, name.clone());
  }
  let mut v: Vec<(u32, String)> = by_id.into_iter().collect();
  v.sort_by_key(|(id, _)| *id);
  Ok(v)
}

fn dict_to_section(entries: &[(u32, String)], strings: &mut Vec<String>, index: &mut HashMap<String, u32>) -> Vec<u32> {
  let max_id = entries.iter().map(|(id, _)| *id).max().unwrap_or(0);
  let mut out = vec![u32::MAX; max_id as usize];
  for (id, name) in entries {
    out[(*id - 1) as usize] = intern(strings, index, name);
  }
  out
}

fn intern(strings: &mut Vec<String>, index: &mut HashMap<String, u32>, s: &str) -> u32 {
  if let Some(&id) = index.get(s) {
    return id;
  }
  let id = strings.len() as u32;
  strings.push(s.to_string());
  index.insert(s.to_string(), id);
  id
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::snapshot::model::{NodeRecord as NR, SnapshotModel as SM};
  use tempfile::tempdir;

  #[test]
  fn compacts_empty_store_from_delta_only() {
    let dir = tempdir().unwrap();
    let mut delta = Delta::new();
    delta.create_node(1, Some("a".into()), vec![]);
    delta.create_node(2, Some("b".into()), vec![]);
    delta.add_edge(1, 1, 2);

    let result = compact(dir.path(), None, &mut delta, &VectorStore::new(), 1, None).unwrap();
    assert_eq!(result.generation, 1);
    assert!(delta.is_empty());

    let snap = SnapshotData::open(&result.path).unwrap();
    assert_eq!(snap.num_nodes, 2);
    assert_eq!(snap.num_edges, 1);
  }

  #[test]
  fn compacts_snapshot_merged_with_delta_changes() {
    let dir = tempdir().unwrap();
    let base = SM {
      generation: 0,
      strings: vec!["alice".into(), "bob".into()],
      labels: vec![],
      etypes: vec![],
      propkeys: vec![],
      nodes: vec![
        NR { node_id: 1, key: Some("alice".into()), labels: vec![], props: vec![], out_edges: vec![] },
        NR { node_id: 2, key: Some("bob".into()), labels: vec![], props: vec![], out_edges: vec![] },
      ],
      edge_props: vec![],
      vector_manifest: vec![],
      vector_fragments: vec![],
      vector_index: vec![],
      vector_node_map: vec![],
    };
    let base_path = write_snapshot(dir.path(), &base).unwrap();
    let snap = SnapshotData::open(&base_path).unwrap();

    let mut delta = Delta::new();
    delta.add_edge(1, 1, 2);
    delta.delete_node(2);
    delta.create_node(3, Some("carol".into()), vec![]);
    delta.add_edge(1, 1, 3);

    let result = compact(dir.path(), Some(&snap), &mut delta, &VectorStore::new(), 1, None).unwrap();
    let merged = SnapshotData::open(&result.path).unwrap();
    assert_eq!(merged.num_nodes, 2); // bob deleted, carol added
    assert!(merged.phys_of(2).is_none());
    let alice_phys = merged.phys_of(1).unwrap();
    let carol_phys = merged.phys_of(3).unwrap();
    assert!(merged.has_edge(alice_phys, 1, carol_phys).unwrap());
  }

  #[test]
  fn compaction_persists_live_vector_store_not_prior_snapshot_bytes() {
    use crate::types::DistanceMetric;

    let dir = tempdir().unwrap();
    let mut delta = Delta::new();
    let result = compact(dir.path(), None, &mut delta, &VectorStore::new(), 1, None).unwrap();
    let snap = SnapshotData::open(&result.path).unwrap();
    assert!(snap.vector_manifest_bytes().unwrap().is_empty());

    let mut vectors = VectorStore::new();
    vectors.add_vector(1, 10, &[1.0, 0.0], DistanceMetric::Euclidean).unwrap();

    let mut delta2 = Delta::new();
    let result2 = compact(dir.path(), Some(&snap), &mut delta2, &vectors, 2, None).unwrap();
    let snap2 = SnapshotData::open(&result2.path).unwrap();
    let decoded = VectorStore::decode(snap2.vector_manifest_bytes().unwrap(), snap2.vector_index_bytes().unwrap()).unwrap();
    assert_eq!(decoded.dimensions_of(1), Some(2));
  }
}
