//! Multi-version concurrency control: transaction bookkeeping, version
//! chains, and background garbage collection (spec.md §4.5).

pub mod gc;
pub mod tx_manager;
pub mod version_chain;

pub use gc::{GarbageCollector, GcConfig, GcResult, GcStats, SharedGcState};
pub use tx_manager::{Transaction, TxManager, TxStatus};
pub use version_chain::VersionChainManager;

use crate::error::{RayError, Result};
use crate::types::{Timestamp, TxId, VersionKey};

/// Bundles the transaction manager and version chains that a transaction
/// needs to begin, record writes, and commit or abort.
#[derive(Debug, Default)]
pub struct Mvcc {
  pub tx_manager: TxManager,
  pub version_chain: VersionChainManager,
  pub gc: GarbageCollector,
}

impl Mvcc {
  pub fn new() -> Self {
    Self {
      tx_manager: TxManager::new(),
      version_chain: VersionChainManager::new(),
      gc: GarbageCollector::new(),
    }
  }

  /// Read timestamp for an op running outside any explicit transaction.
  pub fn current_read_ts(&self) -> Timestamp {
    self.tx_manager.current_read_ts()
  }

  pub fn begin(&mut self, read_only: bool) -> (TxId, Timestamp) {
    self.tx_manager.begin_tx(read_only)
  }

  /// Reseed the commit-timestamp clock from a WAL replay's last applied
  /// commit, so timestamps handed out after reopening a store sort after
  /// every version-chain entry that replay just rebuilt. Must run before any
  /// transaction begins (spec.md §4.3 "Recovery").
  pub fn seed_from_replay(&mut self, last_commit_ts: Option<Timestamp>) {
    if let Some(ts) = last_commit_ts {
      self.tx_manager.seed_next_commit_ts(ts);
    }
  }

  pub fn record_write(&mut self, txid: TxId, key: VersionKey) -> Result<()> {
    self.tx_manager.record_write(txid, key)
  }

  pub fn commit(&mut self, txid: TxId) -> Result<Timestamp> {
    self.tx_manager.commit(txid)
  }

  pub fn abort(&mut self, txid: TxId) -> Result<()> {
    self.tx_manager.abort(txid)
  }

  /// Run a GC pass if the configured interval has elapsed.
  pub fn maybe_run_gc(&mut self) -> Option<GcResult> {
    if self.gc.should_run() {
      Some(self.gc.run_gc(&mut self.tx_manager, &mut self.version_chain))
    } else {
      None
    }
  }

  pub fn force_gc(&mut self) -> GcResult {
    self.gc.run_gc(&mut self.tx_manager, &mut self.version_chain)
  }
}

/// Turn a commit-time conflict into the public error, used by callers that
/// need to surface which key collided.
pub fn conflict_error(key: &VersionKey, conflicting_commit_ts: Timestamp) -> RayError {
  RayError::WriteConflict {
    key: format!("{key:?}"),
    conflicting_commit_ts,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::NodeId;

  #[test]
  fn begin_commit_roundtrip() {
    let mut mvcc = Mvcc::new();
    let (txid, _start_ts) = mvcc.begin(false);
    mvcc.record_write(txid, VersionKey::Node(1 as NodeId)).unwrap();
    let commit_ts = mvcc.commit(txid).unwrap();
    assert!(commit_ts >= 1);
  }
}
