//! WAL record types and their little-endian payload encodings (spec.md §3, §6).

use crate::core::snapshot::writer::{decode_prop_value, encode_prop_value};
use crate::error::{RayError, Result};
use crate::types::{ETypeId, LabelId, NodeId, PropKeyId, PropValue, Timestamp};
use crate::util::binary::{write_f32, write_string, write_u32, write_u64, write_u8, Reader};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
  DefineLabel = 0,
  DefineEtype = 1,
  DefinePropkey = 2,
  CreateNode = 3,
  DeleteNode = 4,
  SetNodeProp = 5,
  SetEdgeProp = 6,
  DelNodeProp = 7,
  DelEdgeProp = 8,
  AddEdge = 9,
  DelEdge = 10,
  SetNodeVector = 11,
  BatchVectors = 12,
  SealFragment = 13,
  CompactFragments = 14,
  CommitBarrier = 15,
  CheckpointMarker = 16,
}

impl RecordType {
  pub fn from_u8(v: u8) -> Option<Self> {
    use RecordType::*;
    Some(match v {
      0 => DefineLabel,
      1 => DefineEtype,
      2 => DefinePropkey,
      3 => CreateNode,
      4 => DeleteNode,
      5 => SetNodeProp,
      6 => SetEdgeProp,
      7 => DelNodeProp,
      8 => DelEdgeProp,
      9 => AddEdge,
      10 => DelEdge,
      11 => SetNodeVector,
      12 => BatchVectors,
      13 => SealFragment,
      14 => CompactFragments,
      15 => CommitBarrier,
      16 => CheckpointMarker,
      _ => return None,
    })
  }
}

#[derive(Debug, Clone)]
pub enum WalRecord {
  DefineLabel { name: String, id: LabelId },
  DefineEtype { name: String, id: ETypeId },
  DefinePropkey { name: String, id: PropKeyId },
  CreateNode { node_id: NodeId, key: Option<String>, labels: Vec<LabelId> },
  DeleteNode { node_id: NodeId },
  SetNodeProp { node_id: NodeId, key: PropKeyId, value: PropValue },
  SetEdgeProp { src: NodeId, etype: ETypeId, dst: NodeId, key: PropKeyId, value: PropValue },
  DelNodeProp { node_id: NodeId, key: PropKeyId },
  DelEdgeProp { src: NodeId, etype: ETypeId, dst: NodeId, key: PropKeyId },
  AddEdge { src: NodeId, etype: ETypeId, dst: NodeId },
  DelEdge { src: NodeId, etype: ETypeId, dst: NodeId },
  SetNodeVector { node_id: NodeId, prop_key: PropKeyId, vector: Vec<f32> },
  BatchVectors { prop_key: PropKeyId, entries: Vec<(NodeId, Vec<f32>)> },
  SealFragment { prop_key: PropKeyId, fragment_id: u32 },
  CompactFragments { prop_key: PropKeyId, retired: Vec<u32>, new_fragment_id: u32 },
  CommitBarrier { commit_ts: Timestamp },
  CheckpointMarker { snapshot_generation: u64 },
}

fn write_opt_string(buf: &mut Vec<u8>, s: &Option<String>) {
  match s {
    Some(s) => {
      write_u8(buf, 1);
      write_string(buf, s);
    }
    None => write_u8(buf, 0),
  }
}

fn read_opt_string(r: &mut Reader) -> Result<Option<String>> {
  Ok(if r.read_u8()? != 0 { Some(r.read_string()?) } else { None })
}

fn write_labels(buf: &mut Vec<u8>, labels: &[LabelId]) {
  write_u32(buf, labels.len() as u32);
  for l in labels {
    write_u32(buf, *l);
  }
}

fn read_labels(r: &mut Reader) -> Result<Vec<LabelId>> {
  let n = r.read_u32()? as usize;
  (0..n).map(|_| r.read_u32()).collect()
}

fn write_vector(buf: &mut Vec<u8>, v: &[f32]) {
  write_u32(buf, v.len() as u32);
  for d in v {
    write_f32(buf, *d);
  }
}

fn read_vector(r: &mut Reader) -> Result<Vec<f32>> {
  let n = r.read_u32()? as usize;
  (0..n).map(|_| r.read_f32()).collect()
}

impl WalRecord {
  pub fn record_type(&self) -> RecordType {
    match self {
      WalRecord::DefineLabel { .. } => RecordType::DefineLabel,
      WalRecord::DefineEtype { .. } => RecordType::DefineEtype,
      WalRecord::DefinePropkey { .. } => RecordType::DefinePropkey,
      WalRecord::CreateNode { .. } => RecordType::CreateNode,
      WalRecord::DeleteNode { .. } => RecordType::DeleteNode,
      WalRecord::SetNodeProp { .. } => RecordType::SetNodeProp,
      WalRecord::SetEdgeProp { .. } => RecordType::SetEdgeProp,
      WalRecord::DelNodeProp { .. } => RecordType::DelNodeProp,
      WalRecord::DelEdgeProp { .. } => RecordType::DelEdgeProp,
      WalRecord::AddEdge { .. } => RecordType::AddEdge,
      WalRecord::DelEdge { .. } => RecordType::DelEdge,
      WalRecord::SetNodeVector { .. } => RecordType::SetNodeVector,
      WalRecord::BatchVectors { .. } => RecordType::BatchVectors,
      WalRecord::SealFragment { .. } => RecordType::SealFragment,
      WalRecord::CompactFragments { .. } => RecordType::CompactFragments,
      WalRecord::CommitBarrier { .. } => RecordType::CommitBarrier,
      WalRecord::CheckpointMarker { .. } => RecordType::CheckpointMarker,
    }
  }

  pub fn encode_payload(&self) -> Vec<u8> {
    let mut buf = Vec::new();
    match self {
      WalRecord::DefineLabel { name, id } | WalRecord::DefineEtype { name, id } | WalRecord::DefinePropkey { name, id } => {
        write_string(&mut buf, name);
        write_u32(&mut buf, *id);
      }
      WalRecord::CreateNode { node_id, key, labels } => {
        write_u32(&mut buf, *node_id);
        write_opt_string(&mut buf, key);
        write_labels(&mut buf, labels);
      }
      WalRecord::DeleteNode { node_id } => {
        write_u32(&mut buf, *node_id);
      }
      WalRecord::SetNodeProp { node_id, key, value } => {
        write_u32(&mut buf, *node_id);
        write_u32(&mut buf, *key);
        encode_prop_value(&mut buf, value);
      }
      WalRecord::SetEdgeProp { src, etype, dst, key, value } => {
        write_u32(&mut buf, *src);
        write_u32(&mut buf, *etype);
        write_u32(&mut buf, *dst);
        write_u32(&mut buf, *key);
        encode_prop_value(&mut buf, value);
      }
      WalRecord::DelNodeProp { node_id, key } => {
        write_u32(&mut buf, *node_id);
        write_u32(&mut buf, *key);
      }
      WalRecord::DelEdgeProp { src, etype, dst, key } => {
        write_u32(&mut buf, *src);
        write_u32(&mut buf, *etype);
        write_u32(&mut buf, *dst);
        write_u32(&mut buf, *key);
      }
      WalRecord::AddEdge { src, etype, dst } | WalRecord::DelEdge { src, etype, dst } => {
        write_u32(&mut buf, *src);
        write_u32(&mut buf, *etype);
        write_u32(&mut buf, *dst);
      }
      WalRecord::SetNodeVector { node_id, prop_key, vector } => {
        write_u32(&mut buf, *node_id);
        write_u32(&mut buf, *prop_key);
        write_vector(&mut buf, vector);
      }
      WalRecord::BatchVectors { prop_key, entries } => {
        write_u32(&mut buf, *prop_key);
        write_u32(&mut buf, entries.len() as u32);
        for (node_id, vector) in entries {
          write_u32(&mut buf, *node_id);
          write_vector(&mut buf, vector);
        }
      }
      WalRecord::SealFragment { prop_key, fragment_id } => {
        write_u32(&mut buf, *prop_key);
        write_u32(&mut buf, *fragment_id);
      }
      WalRecord::CompactFragments { prop_key, retired, new_fragment_id } => {
        write_u32(&mut buf, *prop_key);
        write_u32(&mut buf, retired.len() as u32);
        for id in retired {
          write_u32(&mut buf, *id);
        }
        write_u32(&mut buf, *new_fragment_id);
      }
      WalRecord::CommitBarrier { commit_ts } => {
        write_u64(&mut buf, *commit_ts);
      }
      WalRecord::CheckpointMarker { snapshot_generation } => {
        write_u64(&mut buf, *snapshot_generation);
      }
    }
    buf
  }

  pub fn decode(record_type: RecordType, payload: &[u8]) -> Result<Self> {
    let mut r = Reader::new(payload);
    Ok(match record_type {
      RecordType::DefineLabel => WalRecord::DefineLabel { name: r.read_string()?, id: r.read_u32()? },
      RecordType::DefineEtype => WalRecord::DefineEtype { name: r.read_string()?, id: r.read_u32()? },
      RecordType::DefinePropkey => WalRecord::DefinePropkey { name: r.read_string()?, id: r.read_u32()? },
      RecordType::CreateNode => WalRecord::CreateNode {
        node_id: r.read_u32()?,
        key: read_opt_string(&mut r)?,
        labels: read_labels(&mut r)?,
      },
      RecordType::DeleteNode => WalRecord::DeleteNode { node_id: r.read_u32()? },
      RecordType::SetNodeProp => WalRecord::SetNodeProp {
        node_id: r.read_u32()?,
        key: r.read_u32()?,
        value: decode_prop_value(&mut r)?,
      },
      RecordType::SetEdgeProp => WalRecord::SetEdgeProp {
        src: r.read_u32()?,
        etype: r.read_u32()?,
        dst: r.read_u32()?,
        key: r.read_u32()?,
        value: decode_prop_value(&mut r)?,
      },
      RecordType::DelNodeProp => WalRecord::DelNodeProp { node_id: r.read_u32()?, key: r.read_u32()? },
      RecordType::DelEdgeProp => WalRecord::DelEdgeProp {
        src: r.read_u32()?,
        etype: r.read_u32()?,
        dst: r.read_u32()?,
        key: r.read_u32()?,
      },
      RecordType::AddEdge => WalRecord::AddEdge { src: r.read_u32()?, etype: r.read_u32()?, dst: r.read_u32()? },
      RecordType::DelEdge => WalRecord::DelEdge { src: r.read_u32()?, etype: r.read_u32()?, dst: r.read_u32()? },
      RecordType::SetNodeVector => WalRecord::SetNodeVector {
        node_id: r.read_u32()?,
        prop_key: r.read_u32()?,
        vector: read_vector(&mut r)?,
      },
      RecordType::BatchVectors => {
        let prop_key = r.read_u32()?;
        let n = r.read_u32()? as usize;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
          let node_id = r.read_u32()?;
          let vector = read_vector(&mut r)?;
          entries.push((node_id, vector));
        }
        WalRecord::BatchVectors { prop_key, entries }
      }
      RecordType::SealFragment => WalRecord::SealFragment { prop_key: r.read_u32()?, fragment_id: r.read_u32()? },
      RecordType::CompactFragments => {
        let prop_key = r.read_u32()?;
        let n = r.read_u32()? as usize;
        let mut retired = Vec::with_capacity(n);
        for _ in 0..n {
          retired.push(r.read_u32()?);
        }
        let new_fragment_id = r.read_u32()?;
        WalRecord::CompactFragments { prop_key, retired, new_fragment_id }
      }
      RecordType::CommitBarrier => WalRecord::CommitBarrier { commit_ts: r.read_u64()? },
      RecordType::CheckpointMarker => WalRecord::CheckpointMarker { snapshot_generation: r.read_u64()? },
    })
  }
}

/// Surface decode errors from a truncated/garbled record as the WAL's own
/// corruption kind rather than the generic binary-reader error.
pub fn decode_or_corrupt(record_type: RecordType, payload: &[u8], segment: u64, offset: u64) -> Result<WalRecord> {
  WalRecord::decode(record_type, payload).map_err(|_| RayError::CorruptWalRecord { segment, offset })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roundtrip_each_record_kind() {
    let samples = vec![
      WalRecord::DefineLabel { name: "Person".into(), id: 1 },
      WalRecord::CreateNode { node_id: 1, key: Some("a".into()), labels: vec![1, 2] },
      WalRecord::CreateNode { node_id: 2, key: None, labels: vec![] },
      WalRecord::DeleteNode { node_id: 1 },
      WalRecord::SetNodeProp { node_id: 1, key: 1, value: PropValue::Int(42) },
      WalRecord::SetEdgeProp { src: 1, etype: 1, dst: 2, key: 1, value: PropValue::Str("x".into()) },
      WalRecord::AddEdge { src: 1, etype: 1, dst: 2 },
      WalRecord::DelEdge { src: 1, etype: 1, dst: 2 },
      WalRecord::SetNodeVector { node_id: 1, prop_key: 3, vector: vec![1.0, 2.0, 3.0] },
      WalRecord::BatchVectors {
        prop_key: 3,
        entries: vec![(1, vec![0.1, 0.2]), (2, vec![0.3, 0.4])],
      },
      WalRecord::SealFragment { prop_key: 3, fragment_id: 0 },
      WalRecord::CompactFragments { prop_key: 3, retired: vec![0, 1], new_fragment_id: 2 },
      WalRecord::CommitBarrier { commit_ts: 99 },
      WalRecord::CheckpointMarker { snapshot_generation: 5 },
    ];
    for rec in samples {
      let rt = rec.record_type();
      let payload = rec.encode_payload();
      let decoded = WalRecord::decode(rt, &payload).unwrap();
      assert_eq!(format!("{decoded:?}"), format!("{rec:?}"));
    }
  }
}
