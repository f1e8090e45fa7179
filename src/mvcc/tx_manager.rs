//! Transaction manager: monotonic id/timestamp counters, active-transaction
//! registry, first-writer-wins conflict detection (spec.md §4.5).

use crate::constants::{INITIAL_COMMIT_TS, INITIAL_TX_ID};
use crate::error::{RayError, Result};
use crate::types::{Timestamp, TxId, VersionKey};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
  Active,
  Committed,
  Aborted,
}

#[derive(Debug, Clone)]
pub struct Transaction {
  pub txid: TxId,
  pub start_ts: Timestamp,
  pub commit_ts: Option<Timestamp>,
  pub status: TxStatus,
  pub read_only: bool,
  pub write_set: HashSet<VersionKey>,
}

#[derive(Debug, Default)]
pub struct TxManager {
  next_tx_id: TxId,
  next_commit_ts: Timestamp,
  active: HashMap<TxId, Transaction>,
  /// Highest commit timestamp (and committing txid) recorded for each key,
  /// consulted at commit time for conflict detection.
  committed_writes: HashMap<VersionKey, (Timestamp, TxId)>,
}

impl TxManager {
  pub fn new() -> Self {
    Self {
      next_tx_id: INITIAL_TX_ID,
      next_commit_ts: INITIAL_COMMIT_TS,
      active: HashMap::new(),
      committed_writes: HashMap::new(),
    }
  }

  /// `ts := nextCommitTs` of a reader outside any transaction (strictly-latest view).
  pub fn current_read_ts(&self) -> Timestamp {
    self.next_commit_ts
  }

  /// Advance `next_commit_ts` past `last_commit_ts` so that timestamps
  /// assigned after a WAL replay sort strictly after every historical
  /// version-chain entry rebuilt from that replay (spec.md §4.3
  /// "Recovery"). A no-op if `next_commit_ts` is already past it. Transaction
  /// ids need no equivalent reseeding: they are never persisted to the WAL
  /// (only `commit_ts` is, via `CommitBarrier`), so a fresh `next_tx_id`
  /// starting at `INITIAL_TX_ID` can never collide with the txid `0`
  /// sentinel `replay_wal` uses for replayed version-chain entries.
  pub fn seed_next_commit_ts(&mut self, last_commit_ts: Timestamp) {
    self.next_commit_ts = self.next_commit_ts.max(last_commit_ts + 1);
  }

  pub fn begin_tx(&mut self, read_only: bool) -> (TxId, Timestamp) {
    let txid = self.next_tx_id;
    self.next_tx_id += 1;
    let start_ts = self.next_commit_ts;
    self.active.insert(
      txid,
      Transaction {
        txid,
        start_ts,
        commit_ts: None,
        status: TxStatus::Active,
        read_only,
        write_set: HashSet::new(),
      },
    );
    (txid, start_ts)
  }

  pub fn get_tx(&self, txid: TxId) -> Option<&Transaction> {
    self.active.get(&txid)
  }

  pub fn record_write(&mut self, txid: TxId, key: VersionKey) -> Result<()> {
    let tx = self.active.get_mut(&txid).ok_or(RayError::NoTransaction)?;
    if tx.read_only {
      return Err(RayError::ReadOnly);
    }
    tx.write_set.insert(key);
    Ok(())
  }

  /// Commit `txid`. First-writer-wins: if any key in the write set was
  /// committed by another transaction at or after `startTs`, abort with
  /// `WriteConflict` and leave the delta untouched.
  pub fn commit(&mut self, txid: TxId) -> Result<Timestamp> {
    let tx = self.active.get(&txid).ok_or(RayError::NoTransaction)?;
    for key in &tx.write_set {
      if let Some((commit_ts, owner)) = self.committed_writes.get(key) {
        if *commit_ts >= tx.start_ts && *owner != txid {
          return Err(RayError::WriteConflict {
            key: format!("{key:?}"),
            conflicting_commit_ts: *commit_ts,
          });
        }
      }
    }

    let commit_ts = self.next_commit_ts;
    self.next_commit_ts += 1;

    let tx = self.active.get_mut(&txid).unwrap();
    tx.commit_ts = Some(commit_ts);
    tx.status = TxStatus::Committed;
    let write_set = tx.write_set.clone();
    for key in write_set {
      self.committed_writes.insert(key, (commit_ts, txid));
    }

    if !self.active.values().any(|t| t.status == TxStatus::Active) {
      self.active.remove(&txid);
    }
    Ok(commit_ts)
  }

  pub fn abort(&mut self, txid: TxId) -> Result<()> {
    self.active.remove(&txid).ok_or(RayError::NoTransaction)?;
    Ok(())
  }

  /// Minimum `startTs` of any active transaction, or `nextCommitTs` if none.
  pub fn min_active_ts(&self) -> Timestamp {
    self
      .active
      .values()
      .filter(|t| t.status == TxStatus::Active)
      .map(|t| t.start_ts)
      .min()
      .unwrap_or(self.next_commit_ts)
  }

  pub fn get_all_txs(&self) -> impl Iterator<Item = (&TxId, &Transaction)> {
    self.active.iter()
  }

  pub fn remove_tx(&mut self, txid: TxId) {
    self.active.remove(&txid);
  }

  pub fn active_count(&self) -> usize {
    self.active.values().filter(|t| t.status == TxStatus::Active).count()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::NodeId;

  #[test]
  fn begin_assigns_monotonic_ids() {
    let mut m = TxManager::new();
    let (tx1, ts1) = m.begin_tx(false);
    let (tx2, ts2) = m.begin_tx(false);
    assert!(tx2 > tx1);
    assert_eq!(ts1, ts2, "both began before any commit advanced the clock");
  }

  #[test]
  fn commit_advances_clock_and_cleans_up_when_alone() {
    let mut m = TxManager::new();
    let (tx1, _) = m.begin_tx(false);
    let commit_ts = m.commit(tx1).unwrap();
    assert!(commit_ts >= INITIAL_COMMIT_TS);
    assert!(m.get_tx(tx1).is_none(), "eager cleanup with no other active tx");
  }

  #[test]
  fn conflicting_writers_first_writer_wins() {
    let mut m = TxManager::new();
    let (tx1, _) = m.begin_tx(false);
    let (tx2, _) = m.begin_tx(false);
    let key = VersionKey::Node(1 as NodeId);
    m.record_write(tx1, key.clone()).unwrap();
    m.record_write(tx2, key.clone()).unwrap();

    m.commit(tx1).unwrap();
    let err = m.commit(tx2).unwrap_err();
    assert!(matches!(err, RayError::WriteConflict { .. }));
  }

  #[test]
  fn seed_next_commit_ts_advances_past_replay_history() {
    let mut m = TxManager::new();
    m.seed_next_commit_ts(41);
    let (_tx, start_ts) = m.begin_tx(false);
    assert_eq!(start_ts, 42);
  }

  #[test]
  fn seed_next_commit_ts_never_moves_backward() {
    let mut m = TxManager::new();
    let (tx1, _) = m.begin_tx(false);
    m.commit(tx1).unwrap();
    let before = m.current_read_ts();
    m.seed_next_commit_ts(0);
    assert_eq!(m.current_read_ts(), before);
  }

  #[test]
  fn non_overlapping_writers_both_commit() {
    let mut m = TxManager::new();
    let (tx1, _) = m.begin_tx(false);
    m.record_write(tx1, VersionKey::Node(1)).unwrap();
    m.commit(tx1).unwrap();

    let (tx2, _) = m.begin_tx(false);
    m.record_write(tx2, VersionKey::Node(2)).unwrap();
    assert!(m.commit(tx2).is_ok());
  }
}
