//! Store lifecycle: open/close, schema definitions, maintenance operations,
//! and the vector-search surface (spec.md §6).

use crate::constants::*;
use crate::core::compactor;
use crate::core::delta::Delta;
use crate::core::iter::MergedView;
use crate::core::snapshot::reader::SnapshotData;
use crate::core::wal::{self, FsyncPolicy, WalWriter};
use crate::error::{RayError, Result};
use crate::graph::tx::Tx;
use crate::mvcc::Mvcc;
use crate::types::{CheckResult, DbStats, DistanceMetric, ETypeId, LabelId, NodeId, PropKeyId};
use crate::util::lock::DirLock;
use crate::vector::{VectorSearchHit, VectorStore};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

fn current_snapshot_path(data_dir: &Path) -> PathBuf {
  data_dir.join(CURRENT_SNAPSHOT_NAME)
}

/// Tuning knobs and feature flags (spec.md §6 "Configuration options").
#[derive(Debug, Clone)]
pub struct DbConfig {
  pub mvcc: bool,
  pub mvcc_gc_interval_ms: u64,
  pub mvcc_retention_ms: u64,
  pub wal_segment_soft_cap: u64,
  pub wal_fsync_policy: FsyncPolicy,
  pub compaction_trigger_delta_ops: usize,
  pub vector_row_group_size: usize,
  pub vector_fragment_target_size: usize,
  pub vector_default_metric: DistanceMetric,
}

impl Default for DbConfig {
  fn default() -> Self {
    Self {
      mvcc: true,
      mvcc_gc_interval_ms: DEFAULT_MVCC_GC_INTERVAL_MS,
      mvcc_retention_ms: DEFAULT_MVCC_RETENTION_MS,
      wal_segment_soft_cap: DEFAULT_WAL_SEGMENT_SOFT_CAP,
      wal_fsync_policy: FsyncPolicy::PerCommit,
      compaction_trigger_delta_ops: DEFAULT_COMPACTION_TRIGGER_DELTA_OPS,
      vector_row_group_size: DEFAULT_ROW_GROUP_SIZE,
      vector_fragment_target_size: DEFAULT_FRAGMENT_TARGET_SIZE,
      vector_default_metric: DistanceMetric::Cosine,
    }
  }
}

/// Open-time flags plus the running configuration (spec.md §6 "open").
#[derive(Debug, Clone)]
pub struct OpenOptions {
  pub read_only: bool,
  pub create_if_missing: bool,
  pub config: DbConfig,
}

impl Default for OpenOptions {
  fn default() -> Self {
    Self {
      read_only: false,
      create_if_missing: true,
      config: DbConfig::default(),
    }
  }
}

/// In-memory label/etype/propkey dictionaries, seeded from the snapshot at
/// open and advanced as new ids are defined (spec.md §3 "Identifiers").
#[derive(Default)]
pub(crate) struct SchemaCache {
  pub(crate) labels: HashMap<String, LabelId>,
  pub(crate) etypes: HashMap<String, ETypeId>,
  pub(crate) propkeys: HashMap<String, PropKeyId>,
  pub(crate) next_label: LabelId,
  pub(crate) next_etype: ETypeId,
  pub(crate) next_propkey: PropKeyId,
}

/// One open data directory: the live snapshot, the delta overlaid on top of
/// it, the WAL writer, the MVCC subsystem, and the vector store.
pub struct GraphDB {
  pub(crate) data_dir: PathBuf,
  pub(crate) config: DbConfig,
  pub(crate) read_only: bool,
  pub(crate) lock: Option<DirLock>,
  pub(crate) snapshot: SnapshotData,
  pub(crate) delta: Delta,
  pub(crate) wal: WalWriter,
  pub(crate) mvcc: Mvcc,
  pub(crate) vectors: VectorStore,
  pub(crate) schema: SchemaCache,
  pub(crate) key_index: HashMap<String, NodeId>,
  pub(crate) node_keys: HashMap<NodeId, String>,
  pub(crate) next_node_id: NodeId,
  pub(crate) node_count: u64,
  pub(crate) edge_count: u64,
}

impl GraphDB {
  /// Open (creating if `create_if_missing`) the store at `data_dir`:
  /// acquire the directory lock, load or materialize the current snapshot,
  /// seed the in-memory caches, and replay the WAL on top (spec.md §6
  /// "open", §4.3 "Recovery").
  pub fn open(data_dir: &Path, options: OpenOptions) -> Result<Self> {
    fs::create_dir_all(data_dir).map_err(|e| RayError::io("mkdir", data_dir, e))?;
    let lock = DirLock::acquire(data_dir)?;

    let snap_path = current_snapshot_path(data_dir);
    let snapshot = if snap_path.exists() {
      SnapshotData::open(&snap_path)?
    } else if options.create_if_missing {
      let mut empty = Delta::new();
      let result = compactor::compact(data_dir, None, &mut empty, &VectorStore::new(), INITIAL_SNAPSHOT_GEN, None)?;
      let _ = result;
      SnapshotData::open(&snap_path)?
    } else {
      return Err(RayError::NotFound);
    };

    let vectors = VectorStore::decode(snapshot.vector_manifest_bytes()?, snapshot.vector_index_bytes()?)?;

    let mut db = Self {
      data_dir: data_dir.to_path_buf(),
      read_only: options.read_only,
      lock: Some(lock),
      next_node_id: (snapshot.all_node_ids().into_iter().max().unwrap_or(0) + 1).max(INITIAL_NODE_ID),
      node_count: snapshot.num_nodes as u64,
      edge_count: snapshot.num_edges as u64,
      schema: SchemaCache {
        next_label: snapshot.max_label_id()?.max(INITIAL_LABEL_ID - 1) + 1,
        next_etype: snapshot.max_etype_id()?.max(INITIAL_ETYPE_ID - 1) + 1,
        next_propkey: snapshot.max_propkey_id()?.max(INITIAL_PROPKEY_ID - 1) + 1,
        ..Default::default()
      },
      key_index: HashMap::new(),
      node_keys: HashMap::new(),
      vectors,
      wal: WalWriter::open(&wal::wal_dir(data_dir), options.config.wal_segment_soft_cap, options.config.wal_fsync_policy)?,
      mvcc: Mvcc::new(),
      snapshot,
      delta: Delta::new(),
      config: options.config,
    };
    db.seed_schema_from_snapshot()?;
    db.seed_key_index_from_snapshot()?;
    db.replay_wal()?;
    Ok(db)
  }

  /// Release the directory lock. A dropped `GraphDB` releases it too; this
  /// is for callers that want the error path.
  pub fn close(mut self) -> Result<()> {
    if let Some(lock) = self.lock.take() {
      lock.release()?;
    }
    Ok(())
  }

  fn seed_schema_from_snapshot(&mut self) -> Result<()> {
    for id in 1..=self.snapshot.max_label_id()? {
      if let Some(name) = self.snapshot.label_name(id)? {
        self.schema.labels.insert(name.to_string(), id);
      }
    }
    for id in 1..=self.snapshot.max_etype_id()? {
      if let Some(name) = self.snapshot.etype_name(id)? {
        self.schema.etypes.insert(name.to_string(), id);
      }
    }
    for id in 1..=self.snapshot.max_propkey_id()? {
      if let Some(name) = self.snapshot.propkey_name(id)? {
        self.schema.propkeys.insert(name.to_string(), id);
      }
    }
    Ok(())
  }

  fn seed_key_index_from_snapshot(&mut self) -> Result<()> {
    for node_id in self.snapshot.all_node_ids() {
      let phys = self.snapshot.phys_of(node_id).expect("id came from snapshot's own index");
      if let Some(key) = self.snapshot.key_of(phys)? {
        self.key_index.insert(key.to_string(), node_id);
        self.node_keys.insert(node_id, key.to_string());
      }
    }
    Ok(())
  }

  fn replay_wal(&mut self) -> Result<()> {
    let dir = wal::wal_dir(&self.data_dir);
    let mvcc_enabled = self.config.mvcc;
    let outcome = wal::replay(&dir, |records, commit_ts| {
      for record in records {
        self.apply_record(record);
        if mvcc_enabled {
          self.record_version(record, 0, commit_ts);
        }
      }
    })?;
    if outcome.commits_applied > 0 {
      info!(commits = outcome.commits_applied, truncated = outcome.truncated, "replayed WAL on open");
    }
    self.mvcc.seed_from_replay(outcome.last_commit_ts);
    Ok(())
  }

  pub(crate) fn merged_view(&self) -> MergedView<'_> {
    MergedView::new(&self.snapshot, &self.delta)
  }

  // --- schema -------------------------------------------------------------

  /// Define (or look up) a label name, idempotently (spec.md §6
  /// "defineLabel"). Schema definitions take effect immediately and are not
  /// part of any transaction.
  pub fn define_label(&mut self, name: &str) -> Result<LabelId> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }
    if let Some(&id) = self.schema.labels.get(name) {
      return Ok(id);
    }
    let id = self.schema.next_label;
    self.schema.next_label += 1;
    self.schema.labels.insert(name.to_string(), id);
    self.wal.append(&crate::core::wal::WalRecord::DefineLabel { name: name.to_string(), id })?;
    self.wal.append(&crate::core::wal::WalRecord::CommitBarrier { commit_ts: self.mvcc.current_read_ts() })?;
    Ok(id)
  }

  pub fn define_etype(&mut self, name: &str) -> Result<ETypeId> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }
    if let Some(&id) = self.schema.etypes.get(name) {
      return Ok(id);
    }
    let id = self.schema.next_etype;
    self.schema.next_etype += 1;
    self.schema.etypes.insert(name.to_string(), id);
    self.wal.append(&crate::core::wal::WalRecord::DefineEtype { name: name.to_string(), id })?;
    self.wal.append(&crate::core::wal::WalRecord::CommitBarrier { commit_ts: self.mvcc.current_read_ts() })?;
    Ok(id)
  }

  pub fn define_propkey(&mut self, name: &str) -> Result<PropKeyId> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }
    if let Some(&id) = self.schema.propkeys.get(name) {
      return Ok(id);
    }
    let id = self.schema.next_propkey;
    self.schema.next_propkey += 1;
    self.schema.propkeys.insert(name.to_string(), id);
    self.wal.append(&crate::core::wal::WalRecord::DefinePropkey { name: name.to_string(), id })?;
    self.wal.append(&crate::core::wal::WalRecord::CommitBarrier { commit_ts: self.mvcc.current_read_ts() })?;
    Ok(id)
  }

  pub fn label_id(&self, name: &str) -> Option<LabelId> {
    self.schema.labels.get(name).copied()
  }

  pub fn etype_id(&self, name: &str) -> Option<ETypeId> {
    self.schema.etypes.get(name).copied()
  }

  pub fn propkey_id(&self, name: &str) -> Option<PropKeyId> {
    self.schema.propkeys.get(name).copied()
  }

  // --- vector search --------------------------------------------------------

  /// (Re)build the IVF index for `prop_key_id` (spec.md §6 "buildVectorIndex").
  /// Not WAL-logged: the trained index is persisted in full at the next
  /// compaction, and is cheap to rebuild from the manifest in the meantime.
  pub fn build_vector_index(&mut self, prop_key_id: PropKeyId, n_clusters: usize, max_iterations: usize, seed: Option<u64>) -> Result<()> {
    self.vectors.build_index(prop_key_id, n_clusters, max_iterations, seed)
  }

  pub fn search_vectors(
    &self,
    prop_key_id: PropKeyId,
    query: &[f32],
    k: usize,
    n_probe: usize,
    filter: Option<&dyn Fn(NodeId) -> bool>,
  ) -> Result<Vec<VectorSearchHit>> {
    self.vectors.search(prop_key_id, query, k, n_probe, filter)
  }

  // --- maintenance ----------------------------------------------------------

  /// Fold the delta into a new snapshot generation if it has grown past
  /// `compaction_trigger_delta_ops`, or unconditionally if `force` (spec.md
  /// §6 "optimize", §4.4).
  pub fn optimize(&mut self, force: bool) -> Result<()> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }
    if force || self.delta.op_count >= self.config.compaction_trigger_delta_ops {
      self.compact()?;
    }
    Ok(())
  }

  pub(crate) fn maybe_compact(&mut self) -> Result<()> {
    if self.delta.op_count >= self.config.compaction_trigger_delta_ops {
      self.compact()?;
    }
    Ok(())
  }

  fn compact(&mut self) -> Result<()> {
    let new_generation = self.snapshot.generation + 1;
    let current_segment = self.wal.segment_id();
    let through = current_segment.checked_sub(1);
    info!(generation = new_generation, delta_ops = self.delta.op_count, "compacting snapshot");
    compactor::compact(&self.data_dir, Some(&self.snapshot), &mut self.delta, &self.vectors, new_generation, through)?;
    self.snapshot = SnapshotData::open(&current_snapshot_path(&self.data_dir))?;
    self.reload_caches_from_snapshot()?;
    Ok(())
  }

  fn reload_caches_from_snapshot(&mut self) -> Result<()> {
    self.key_index.clear();
    self.node_keys.clear();
    self.seed_key_index_from_snapshot()?;
    self.node_count = self.snapshot.num_nodes as u64;
    self.edge_count = self.snapshot.num_edges as u64;
    Ok(())
  }

  pub fn stats(&self) -> Result<DbStats> {
    let dir = wal::wal_dir(&self.data_dir);
    let segments = wal::list_segments(&dir)?;
    let wal_bytes = segments
      .iter()
      .filter_map(|id| fs::metadata(wal::segment_path(&dir, *id)).ok())
      .map(|m| m.len())
      .sum();
    let gc_stats = self.mvcc.gc.get_stats();
    Ok(DbStats {
      node_count: self.node_count,
      edge_count: self.edge_count,
      snapshot_gen: self.snapshot.generation,
      wal_bytes,
      wal_segment_count: segments.len() as u64,
      delta_ops: self.delta.op_count as u64,
      versions_pruned: gc_stats.versions_pruned,
      gc_runs: gc_stats.gc_runs,
    })
  }

  /// Validate the current snapshot's internal consistency (spec.md §6
  /// "check").
  pub fn check(&self) -> Result<CheckResult> {
    crate::check::check(&current_snapshot_path(&self.data_dir))
  }
}
