//! Node create/delete/lookup operations (spec.md §6 "Nodes").

use crate::core::wal::WalRecord;
use crate::error::{RayError, Result};
use crate::graph::db::GraphDB;
use crate::graph::tx::Tx;
use crate::types::{LabelId, NodeId, PropKeyId, PropValue, VersionKey};

impl GraphDB {
  /// Create a node, optionally with a unique `key`, labels, and initial
  /// properties (spec.md §6 "createNode"). Fails with `KeyExists` if `key`
  /// is already taken by a visible node.
  pub fn create_node(&mut self, tx: &mut Tx, key: Option<String>, labels: Vec<LabelId>, props: Vec<(PropKeyId, PropValue)>) -> Result<NodeId> {
    self.ensure_writable(tx)?;
    if let Some(k) = &key {
      if self.key_index.contains_key(k) || tx.local.key_taken(k) {
        return Err(RayError::KeyExists { key: k.clone() });
      }
    }
    let node_id = self.next_node_id;
    self.next_node_id += 1;

    tx.local.create_node(node_id, key.clone(), labels.clone());
    self.track_write(tx, VersionKey::Node(node_id))?;
    tx.records.push(WalRecord::CreateNode { node_id, key, labels });

    for (prop_key, value) in props {
      self.set_node_prop(tx, node_id, prop_key, value)?;
    }
    Ok(node_id)
  }

  /// Delete a node. Returns `false` if it did not exist. Edges and
  /// properties referencing it are hidden by visibility checks rather than
  /// eagerly rewritten; the next compaction drops them for good (spec.md
  /// §6 "deleteNode").
  pub fn delete_node(&mut self, tx: &mut Tx, node_id: NodeId) -> Result<bool> {
    self.ensure_writable(tx)?;
    if !self.node_exists(Some(tx), node_id)? {
      return Ok(false);
    }
    tx.local.delete_node(node_id);
    self.track_write(tx, VersionKey::Node(node_id))?;
    tx.records.push(WalRecord::DeleteNode { node_id });
    Ok(true)
  }

  /// Look up a node by its unique key, if any (spec.md §6 "getNodeByKey").
  pub fn get_node_by_key(&self, tx: Option<&Tx>, key: &str) -> Result<Option<NodeId>> {
    if let Some(t) = tx {
      if let Some(&node_id) = t.local.key_index.get(key) {
        return Ok(Some(node_id));
      }
    }
    Ok(self.key_index.get(key).copied())
  }

  /// Whether `node_id` is visible under `tx`'s snapshot (or the latest
  /// committed view if `tx` is `None`), per spec.md §4.5 "Visibility".
  pub fn node_exists(&self, tx: Option<&Tx>, node_id: NodeId) -> Result<bool> {
    if let Some(t) = tx {
      if t.local.is_node_deleted(node_id) {
        return Ok(false);
      }
      if t.local.created_node(node_id).is_some() {
        return Ok(true);
      }
    }
    if self.config.mvcc {
      let ts = self.read_ts(tx);
      if let Some(v) = self.mvcc.version_chain.visible_node(node_id, ts) {
        return Ok(!v.deleted);
      }
    }
    Ok(self.merged_view().node_exists(node_id))
  }
}

#[cfg(test)]
mod tests {
  use crate::graph::db::{GraphDB, OpenOptions};
  use tempfile::tempdir;

  #[test]
  fn create_node_rejects_duplicate_key() {
    let dir = tempdir().unwrap();
    let mut db = GraphDB::open(dir.path(), OpenOptions::default()).unwrap();
    let mut tx = db.begin(false).unwrap();
    db.create_node(&mut tx, Some("a".into()), vec![], vec![]).unwrap();
    let err = db.create_node(&mut tx, Some("a".into()), vec![], vec![]).unwrap_err();
    assert!(matches!(err, crate::error::RayError::KeyExists { .. }));
  }

  #[test]
  fn delete_node_returns_false_when_missing() {
    let dir = tempdir().unwrap();
    let mut db = GraphDB::open(dir.path(), OpenOptions::default()).unwrap();
    let mut tx = db.begin(false).unwrap();
    assert!(!db.delete_node(&mut tx, 999).unwrap());
  }

  #[test]
  fn read_your_own_writes_within_a_transaction() {
    let dir = tempdir().unwrap();
    let mut db = GraphDB::open(dir.path(), OpenOptions::default()).unwrap();
    let mut tx = db.begin(false).unwrap();
    let node = db.create_node(&mut tx, Some("a".into()), vec![], vec![]).unwrap();
    assert!(db.node_exists(Some(&tx), node).unwrap());
    db.commit(tx).unwrap();
  }
}
