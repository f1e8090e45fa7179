//! In-memory shape fed to the snapshot writer. The compactor (core::compactor)
//! builds one of these by merging the live snapshot with the delta; the
//! writer turns it into the on-disk CSR layout described in spec.md §6.

use crate::types::{ETypeId, LabelId, NodeId, PropKeyId, PropValue};

#[derive(Debug, Clone)]
pub struct NodeRecord {
  pub node_id: NodeId,
  pub key: Option<String>,
  pub labels: Vec<LabelId>,
  pub props: Vec<(PropKeyId, PropValue)>,
  /// Outgoing edges as `(etype, dst)`, not yet sorted; the writer sorts by
  /// `(etype, dst_phys)` once physical indices are assigned.
  pub out_edges: Vec<(ETypeId, NodeId)>,
}

#[derive(Debug, Clone)]
pub struct EdgeRecord {
  pub props: Vec<(PropKeyId, PropValue)>,
}

/// Everything the writer needs. `nodes` is in final phys-assignment order
/// (contract: deterministic given the compactor's inputs, spec.md §4.4 step 3).
#[derive(Debug, Clone, Default)]
pub struct SnapshotModel {
  pub generation: u64,
  pub strings: Vec<String>,
  /// `labels[i]` is the string id for label id `i + 1`.
  pub labels: Vec<u32>,
  pub etypes: Vec<u32>,
  pub propkeys: Vec<u32>,
  pub nodes: Vec<NodeRecord>,
  /// Edge properties keyed by the edge's logical triple; the writer resolves
  /// this to a flat out-CSR index once phys assignment is fixed.
  pub edge_props: Vec<((NodeId, ETypeId, NodeId), Vec<(PropKeyId, PropValue)>)>,
  pub vector_manifest: Vec<u8>,
  pub vector_fragments: Vec<u8>,
  pub vector_index: Vec<u8>,
  pub vector_node_map: Vec<u8>,
}
