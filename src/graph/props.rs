//! Node/edge property get/set/delete, and the vector-property surface that
//! sits on top of them (spec.md §6 "Properties", §4.7 "Vector store").

use crate::core::wal::WalRecord;
use crate::error::{RayError, Result};
use crate::graph::db::GraphDB;
use crate::graph::tx::Tx;
use crate::types::{EdgeKey, ETypeId, NodeId, PropKeyId, PropValue, VersionData, VersionKey};

impl GraphDB {
  pub fn set_node_prop(&mut self, tx: &mut Tx, node_id: NodeId, prop_key: PropKeyId, value: PropValue) -> Result<()> {
    self.ensure_writable(tx)?;
    if !self.node_exists(Some(tx), node_id)? {
      return Err(RayError::NotFound);
    }
    tx.local.set_node_prop(node_id, prop_key, value.clone());
    self.track_write(tx, VersionKey::NodeProp(node_id, prop_key))?;
    tx.records.push(WalRecord::SetNodeProp { node_id, key: prop_key, value });
    Ok(())
  }

  pub fn get_node_prop(&self, tx: Option<&Tx>, node_id: NodeId, prop_key: PropKeyId) -> Result<Option<PropValue>> {
    if let Some(t) = tx {
      if let Some(patch) = t.local.node_prop_patch(node_id, prop_key) {
        return Ok(patch.clone());
      }
    }
    // The node's own visibility must gate every prop read: a deleted node's
    // property versions are never retroactively tombstoned (`record_version`
    // only appends to `node_versions` for a `DeleteNode`), so checking this
    // after a version-chain hit would let a dead node's last prop value
    // resurrect forever instead of raising `NotFound`.
    if !self.node_exists(tx, node_id)? {
      return Err(RayError::NotFound);
    }
    if self.config.mvcc {
      let ts = self.read_ts(tx);
      if let Some(v) = self.mvcc.version_chain.visible_node_prop(node_id, prop_key, ts) {
        return Ok(match &v.data {
          VersionData::Prop(p) if !v.deleted => Some(p.clone()),
          _ => None,
        });
      }
    }
    if let Some(patch) = self.delta.node_prop_patch(node_id, prop_key) {
      return Ok(patch.clone());
    }
    match self.snapshot.phys_of(node_id) {
      Some(phys) => Ok(self.snapshot.get_node_prop(phys, prop_key)?),
      None => Ok(None),
    }
  }

  /// Returns `false` if the node had no value for `prop_key`.
  pub fn del_node_prop(&mut self, tx: &mut Tx, node_id: NodeId, prop_key: PropKeyId) -> Result<bool> {
    self.ensure_writable(tx)?;
    if self.get_node_prop(Some(tx), node_id, prop_key)?.is_none() {
      return Ok(false);
    }
    tx.local.del_node_prop(node_id, prop_key);
    self.track_write(tx, VersionKey::NodeProp(node_id, prop_key))?;
    tx.records.push(WalRecord::DelNodeProp { node_id, key: prop_key });
    Ok(true)
  }

  pub fn set_edge_prop(&mut self, tx: &mut Tx, src: NodeId, etype: ETypeId, dst: NodeId, prop_key: PropKeyId, value: PropValue) -> Result<()> {
    self.ensure_writable(tx)?;
    if !self.edge_exists(Some(tx), src, etype, dst)? {
      return Err(RayError::NotFound);
    }
    let key = EdgeKey::new(src, etype, dst);
    tx.local.set_edge_prop(key, prop_key, value.clone());
    self.track_write(tx, VersionKey::EdgeProp(key, prop_key))?;
    tx.records.push(WalRecord::SetEdgeProp { src, etype, dst, key: prop_key, value });
    Ok(())
  }

  pub fn get_edge_prop(&self, tx: Option<&Tx>, src: NodeId, etype: ETypeId, dst: NodeId, prop_key: PropKeyId) -> Result<Option<PropValue>> {
    let key = EdgeKey::new(src, etype, dst);
    if let Some(t) = tx {
      if let Some(patch) = t.local.edge_prop_patch(key, prop_key) {
        return Ok(patch.clone());
      }
    }
    // See the equivalent check in `get_node_prop`: the edge's own visibility
    // must gate the read, since a deleted edge's prop versions aren't
    // tombstoned alongside it.
    if !self.edge_exists(tx, src, etype, dst)? {
      return Err(RayError::NotFound);
    }
    if self.config.mvcc {
      let ts = self.read_ts(tx);
      if let Some(v) = self.mvcc.version_chain.visible_edge_prop(&key, prop_key, ts) {
        return Ok(match &v.data {
          VersionData::Prop(p) if !v.deleted => Some(p.clone()),
          _ => None,
        });
      }
    }
    if let Some(patch) = self.delta.edge_prop_patch(key, prop_key) {
      return Ok(patch.clone());
    }
    let (Some(src_phys), Some(dst_phys)) = (self.snapshot.phys_of(src), self.snapshot.phys_of(dst)) else {
      return Ok(None);
    };
    match self.snapshot.out_edge_flat_index(src_phys, etype, dst_phys)? {
      Some(loc) => Ok(self.snapshot.get_edge_prop(loc, prop_key)?),
      None => Ok(None),
    }
  }

  pub fn del_edge_prop(&mut self, tx: &mut Tx, src: NodeId, etype: ETypeId, dst: NodeId, prop_key: PropKeyId) -> Result<bool> {
    self.ensure_writable(tx)?;
    if self.get_edge_prop(Some(tx), src, etype, dst, prop_key)?.is_none() {
      return Ok(false);
    }
    let key = EdgeKey::new(src, etype, dst);
    tx.local.del_edge_prop(key, prop_key);
    self.track_write(tx, VersionKey::EdgeProp(key, prop_key))?;
    tx.records.push(WalRecord::DelEdgeProp { src, etype, dst, key: prop_key });
    Ok(true)
  }

  // --- vector properties ----------------------------------------------------

  /// Store `vector` as `node_id`'s value for the vector-typed property
  /// `prop_key` (spec.md §6 "addVector"). Buffered like any other write;
  /// the IVF index (if built) is kept in sync at apply time.
  pub fn add_vector(&mut self, tx: &mut Tx, node_id: NodeId, prop_key: PropKeyId, vector: Vec<f32>) -> Result<()> {
    self.ensure_writable(tx)?;
    if !self.node_exists(Some(tx), node_id)? {
      return Err(RayError::NotFound);
    }
    tx.records.push(WalRecord::SetNodeVector { node_id, prop_key, vector });
    Ok(())
  }

  /// Tombstone `node_id`'s vector for `prop_key` (spec.md §6
  /// "deleteVector"). The wire format has no dedicated delete-vector
  /// record; this reuses `DelNodeProp`, since a vector is modeled as the
  /// value of a vector-typed node property (see DESIGN.md).
  pub fn delete_vector(&mut self, tx: &mut Tx, node_id: NodeId, prop_key: PropKeyId) -> Result<()> {
    self.ensure_writable(tx)?;
    tx.records.push(WalRecord::DelNodeProp { node_id, key: prop_key });
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use crate::graph::db::{GraphDB, OpenOptions};
  use crate::types::PropValue;
  use tempfile::tempdir;

  #[test]
  fn set_and_get_node_prop() {
    let dir = tempdir().unwrap();
    let mut db = GraphDB::open(dir.path(), OpenOptions::default()).unwrap();
    let mut tx = db.begin(false).unwrap();
    let a = db.create_node(&mut tx, None, vec![], vec![]).unwrap();
    db.set_node_prop(&mut tx, a, 1, PropValue::Int(42)).unwrap();
    assert_eq!(db.get_node_prop(Some(&tx), a, 1).unwrap(), Some(PropValue::Int(42)));
    db.commit(tx).unwrap();
    assert_eq!(db.get_node_prop(None, a, 1).unwrap(), Some(PropValue::Int(42)));
  }

  #[test]
  fn del_node_prop_returns_false_if_absent() {
    let dir = tempdir().unwrap();
    let mut db = GraphDB::open(dir.path(), OpenOptions::default()).unwrap();
    let mut tx = db.begin(false).unwrap();
    let a = db.create_node(&mut tx, None, vec![], vec![]).unwrap();
    assert!(!db.del_node_prop(&mut tx, a, 1).unwrap());
  }

  #[test]
  fn deleted_node_prop_is_not_found_not_resurrected() {
    let dir = tempdir().unwrap();
    let mut db = GraphDB::open(dir.path(), OpenOptions::default()).unwrap();
    let mut tx = db.begin(false).unwrap();
    let a = db.create_node(&mut tx, None, vec![], vec![]).unwrap();
    db.set_node_prop(&mut tx, a, 1, PropValue::Int(7)).unwrap();
    db.commit(tx).unwrap();

    let mut tx2 = db.begin(false).unwrap();
    assert!(db.delete_node(&mut tx2, a).unwrap());
    db.commit(tx2).unwrap();

    let err = db.get_node_prop(None, a, 1).unwrap_err();
    assert!(matches!(err, crate::error::RayError::NotFound));
  }

  #[test]
  fn deleted_edge_prop_is_not_found_not_resurrected() {
    let dir = tempdir().unwrap();
    let mut db = GraphDB::open(dir.path(), OpenOptions::default()).unwrap();
    let mut tx = db.begin(false).unwrap();
    let a = db.create_node(&mut tx, None, vec![], vec![]).unwrap();
    let b = db.create_node(&mut tx, None, vec![], vec![]).unwrap();
    db.add_edge(&mut tx, a, 1, b).unwrap();
    db.set_edge_prop(&mut tx, a, 1, b, 2, PropValue::Bool(true)).unwrap();
    db.commit(tx).unwrap();

    let mut tx2 = db.begin(false).unwrap();
    assert!(db.delete_edge(&mut tx2, a, 1, b).unwrap());
    db.commit(tx2).unwrap();

    let err = db.get_edge_prop(None, a, 1, b, 2).unwrap_err();
    assert!(matches!(err, crate::error::RayError::NotFound));
  }

  #[test]
  fn edge_prop_roundtrip() {
    let dir = tempdir().unwrap();
    let mut db = GraphDB::open(dir.path(), OpenOptions::default()).unwrap();
    let mut tx = db.begin(false).unwrap();
    let a = db.create_node(&mut tx, None, vec![], vec![]).unwrap();
    let b = db.create_node(&mut tx, None, vec![], vec![]).unwrap();
    db.add_edge(&mut tx, a, 1, b).unwrap();
    db.set_edge_prop(&mut tx, a, 1, b, 2, PropValue::Float(1.5)).unwrap();
    db.commit(tx).unwrap();
    assert_eq!(db.get_edge_prop(None, a, 1, b, 2).unwrap(), Some(PropValue::Float(1.5)));
  }
}
