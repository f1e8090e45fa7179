//! Edge create/delete/lookup and neighbor iteration (spec.md §6 "Edges").

use crate::core::wal::WalRecord;
use crate::error::{RayError, Result};
use crate::graph::db::GraphDB;
use crate::graph::tx::Tx;
use crate::types::{EdgeKey, ETypeId, NodeId, VersionKey};
use std::collections::HashSet;

impl GraphDB {
  /// Add an edge `src -[etype]-> dst`. Both endpoints must be visible
  /// (spec.md §6 "addEdge").
  pub fn add_edge(&mut self, tx: &mut Tx, src: NodeId, etype: ETypeId, dst: NodeId) -> Result<()> {
    self.ensure_writable(tx)?;
    if !self.node_exists(Some(tx), src)? || !self.node_exists(Some(tx), dst)? {
      return Err(RayError::NotFound);
    }
    tx.local.add_edge(src, etype, dst);
    self.track_write(tx, VersionKey::Edge(EdgeKey::new(src, etype, dst)))?;
    tx.records.push(WalRecord::AddEdge { src, etype, dst });
    Ok(())
  }

  /// Remove an edge. Returns `false` if it did not exist (spec.md §6
  /// "deleteEdge").
  pub fn delete_edge(&mut self, tx: &mut Tx, src: NodeId, etype: ETypeId, dst: NodeId) -> Result<bool> {
    self.ensure_writable(tx)?;
    if !self.edge_exists(Some(tx), src, etype, dst)? {
      return Ok(false);
    }
    tx.local.del_edge(src, etype, dst);
    self.track_write(tx, VersionKey::Edge(EdgeKey::new(src, etype, dst)))?;
    tx.records.push(WalRecord::DelEdge { src, etype, dst });
    Ok(true)
  }

  /// Edge existence, checked in the order spec.md §4.6 prescribes: local
  /// overlay, then version-chain (if MVCC) or the latest merged view.
  pub fn edge_exists(&self, tx: Option<&Tx>, src: NodeId, etype: ETypeId, dst: NodeId) -> Result<bool> {
    if let Some(t) = tx {
      if t.local.out_del_contains(src, etype, dst) {
        return Ok(false);
      }
      if t.local.out_add_contains(src, etype, dst) {
        return Ok(true);
      }
    }
    if !self.node_exists(tx, src)? || !self.node_exists(tx, dst)? {
      return Ok(false);
    }
    if self.config.mvcc {
      let ts = self.read_ts(tx);
      if let Some(v) = self.mvcc.version_chain.visible_edge(&EdgeKey::new(src, etype, dst), ts) {
        return Ok(!v.deleted);
      }
    }
    self.merged_view().has_edge(src, etype, dst)
  }

  /// Outgoing neighbors of `node_id`, optionally restricted to `etype`
  /// (spec.md §6 "neighborsOut"). Visibility-filtered and deduplicated.
  pub fn neighbors_out(&self, tx: Option<&Tx>, node_id: NodeId, etype: Option<ETypeId>) -> Result<Vec<(ETypeId, NodeId)>> {
    self.neighbors(tx, node_id, etype, true)
  }

  /// Incoming neighbors of `node_id`, optionally restricted to `etype`
  /// (spec.md §6 "neighborsIn").
  pub fn neighbors_in(&self, tx: Option<&Tx>, node_id: NodeId, etype: Option<ETypeId>) -> Result<Vec<(ETypeId, NodeId)>> {
    self.neighbors(tx, node_id, etype, false)
  }

  fn neighbors(&self, tx: Option<&Tx>, node_id: NodeId, etype: Option<ETypeId>, outgoing: bool) -> Result<Vec<(ETypeId, NodeId)>> {
    if !self.node_exists(tx, node_id)? {
      return Ok(Vec::new());
    }
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    let view = self.merged_view();
    let committed: Vec<(ETypeId, NodeId)> = if outgoing { view.out_edges(node_id)?.collect() } else { view.in_edges(node_id)?.collect() };
    for (et, other) in committed {
      if etype.is_some_and(|want| want != et) {
        continue;
      }
      if !self.node_exists(tx, other)? {
        continue;
      }
      if seen.insert((et, other)) {
        out.push((et, other));
      }
    }

    if let Some(t) = tx {
      let added: Vec<(ETypeId, NodeId)> = if outgoing { t.local.out_added(node_id).copied().collect() } else { t.local.in_added(node_id).copied().collect() };
      for (et, other) in added {
        if etype.is_some_and(|want| want != et) {
          continue;
        }
        if t.local.is_node_deleted(other) {
          continue;
        }
        if seen.insert((et, other)) {
          out.push((et, other));
        }
      }
      out.retain(|(et, other)| {
        let tombstoned = if outgoing {
          t.local.out_del_contains(node_id, *et, *other)
        } else {
          t.local.in_del_contains(node_id, *et, *other)
        };
        !tombstoned
      });
    }
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use crate::graph::db::{GraphDB, OpenOptions};
  use tempfile::tempdir;

  #[test]
  fn add_and_query_edge() {
    let dir = tempdir().unwrap();
    let mut db = GraphDB::open(dir.path(), OpenOptions::default()).unwrap();
    let mut tx = db.begin(false).unwrap();
    let a = db.create_node(&mut tx, None, vec![], vec![]).unwrap();
    let b = db.create_node(&mut tx, None, vec![], vec![]).unwrap();
    db.add_edge(&mut tx, a, 1, b).unwrap();
    assert!(db.edge_exists(Some(&tx), a, 1, b).unwrap());
    db.commit(tx).unwrap();
    assert!(db.edge_exists(None, a, 1, b).unwrap());
    assert_eq!(db.neighbors_out(None, a, None).unwrap(), vec![(1, b)]);
    assert_eq!(db.neighbors_in(None, b, None).unwrap(), vec![(1, a)]);
  }

  #[test]
  fn add_edge_to_missing_node_fails() {
    let dir = tempdir().unwrap();
    let mut db = GraphDB::open(dir.path(), OpenOptions::default()).unwrap();
    let mut tx = db.begin(false).unwrap();
    let a = db.create_node(&mut tx, None, vec![], vec![]).unwrap();
    let err = db.add_edge(&mut tx, a, 1, 999).unwrap_err();
    assert!(matches!(err, crate::error::RayError::NotFound));
  }

  #[test]
  fn delete_edge_then_query_returns_false() {
    let dir = tempdir().unwrap();
    let mut db = GraphDB::open(dir.path(), OpenOptions::default()).unwrap();
    let mut tx = db.begin(false).unwrap();
    let a = db.create_node(&mut tx, None, vec![], vec![]).unwrap();
    let b = db.create_node(&mut tx, None, vec![], vec![]).unwrap();
    db.add_edge(&mut tx, a, 1, b).unwrap();
    db.commit(tx).unwrap();

    let mut tx2 = db.begin(false).unwrap();
    assert!(db.delete_edge(&mut tx2, a, 1, b).unwrap());
    db.commit(tx2).unwrap();
    assert!(!db.edge_exists(None, a, 1, b).unwrap());
  }
}
