//! Row-group columnar storage for one fragment of a vector property
//! (spec.md §4.7 "Fragment", "Row group").

use crate::types::FragmentState;
use crate::util::binary::{write_u32, Reader};
use crate::vector::distance::normalize_in_place;

/// A fixed-capacity `dimensions * capacity` slab of vectors, laid out
/// contiguously: vector `i` dimension `d` lives at `i*dimensions + d`.
struct RowGroup {
  data: Vec<f32>,
  count: usize,
  capacity: usize,
  dimensions: usize,
}

impl RowGroup {
  fn new(capacity: usize, dimensions: usize) -> Self {
    Self {
      data: vec![0.0; capacity * dimensions],
      count: 0,
      capacity,
      dimensions,
    }
  }

  fn is_full(&self) -> bool {
    self.count >= self.capacity
  }

  fn push(&mut self, vector: &[f32], normalize: bool) -> usize {
    let idx = self.count;
    let offset = idx * self.dimensions;
    self.data[offset..offset + self.dimensions].copy_from_slice(vector);
    if normalize {
      normalize_in_place(&mut self.data[offset..offset + self.dimensions]);
    }
    self.count += 1;
    idx
  }

  fn get(&self, local: usize) -> &[f32] {
    let offset = local * self.dimensions;
    &self.data[offset..offset + self.dimensions]
  }

  fn trim_to_count(&mut self) {
    self.data.truncate(self.count * self.dimensions);
    self.capacity = self.count;
  }
}

/// One sealable slab of vectors plus a parallel deletion bitmap.
///
/// State machine: `active --seal()--> sealed --(selected)--> sealed_draining
/// --(replacement installed)--> retired`. Retired fragments keep their id
/// (for chronology) but release their row-group storage.
pub struct Fragment {
  pub id: u64,
  pub state: FragmentState,
  row_groups: Vec<RowGroup>,
  deleted: Vec<bool>,
  pub total: usize,
  pub deleted_count: usize,
  dimensions: usize,
  row_group_size: usize,
  target_size: usize,
}

impl Fragment {
  pub fn new(id: u64, dimensions: usize, row_group_size: usize, target_size: usize) -> Self {
    Self {
      id,
      state: FragmentState::Active,
      row_groups: Vec::new(),
      deleted: vec![false; target_size],
      total: 0,
      deleted_count: 0,
      dimensions,
      row_group_size,
      target_size,
    }
  }

  pub fn is_full(&self) -> bool {
    self.total >= self.target_size
  }

  /// Append `vector`, returning its local index within the fragment. A full
  /// trailing row group allocates a fresh one.
  pub fn insert(&mut self, vector: &[f32], normalize: bool) -> usize {
    if self.row_groups.last().map_or(true, RowGroup::is_full) {
      self.row_groups.push(RowGroup::new(self.row_group_size, self.dimensions));
    }
    let rg_index = self.row_groups.len() - 1;
    let local_in_rg = self.row_groups[rg_index].push(vector, normalize);
    self.total += 1;
    rg_index * self.row_group_size + local_in_rg
  }

  pub fn get(&self, local: usize) -> &[f32] {
    let rg_index = local / self.row_group_size;
    let in_rg = local % self.row_group_size;
    self.row_groups[rg_index].get(in_rg)
  }

  pub fn is_deleted(&self, local: usize) -> bool {
    self.deleted.get(local).copied().unwrap_or(true)
  }

  pub fn tombstone(&mut self, local: usize) {
    if let Some(slot) = self.deleted.get_mut(local) {
      if !*slot {
        *slot = true;
        self.deleted_count += 1;
      }
    }
  }

  pub fn deletion_ratio(&self) -> f32 {
    if self.total == 0 {
      0.0
    } else {
      self.deleted_count as f32 / self.total as f32
    }
  }

  /// Make the fragment immutable and drop the trailing row group's unused
  /// capacity.
  pub fn seal(&mut self) {
    self.state = FragmentState::Sealed;
    if let Some(last) = self.row_groups.last_mut() {
      last.trim_to_count();
    }
  }

  /// Release row-group storage (the id and counts are kept for chronology).
  pub fn release(&mut self) {
    self.row_groups.clear();
  }

  /// All `(local_index, vector)` pairs not tombstoned, in insertion order.
  pub fn live_vectors(&self) -> impl Iterator<Item = (usize, &[f32])> + '_ {
    (0..self.total).filter(move |i| !self.is_deleted(*i)).map(move |i| (i, self.get(i)))
  }

  pub fn encode(&self, buf: &mut Vec<u8>) {
    write_u32(buf, self.id as u32);
    write_u32(buf, self.state as u32);
    write_u32(buf, self.dimensions as u32);
    write_u32(buf, self.row_group_size as u32);
    write_u32(buf, self.target_size as u32);
    write_u32(buf, self.total as u32);
    write_u32(buf, self.deleted_count as u32);
    write_u32(buf, self.deleted.len() as u32);
    for d in &self.deleted {
      buf.push(if *d { 1 } else { 0 });
    }
    write_u32(buf, self.total as u32);
    for i in 0..self.total {
      for v in self.get(i) {
        buf.extend_from_slice(&v.to_le_bytes());
      }
    }
  }

  pub fn decode(r: &mut Reader) -> crate::error::Result<Self> {
    let id = r.read_u32()? as u64;
    let state = fragment_state_from_u32(r.read_u32()?);
    let dimensions = r.read_u32()? as usize;
    let row_group_size = r.read_u32()? as usize;
    let target_size = r.read_u32()? as usize;
    let total = r.read_u32()? as usize;
    let deleted_count = r.read_u32()? as usize;
    let deleted_len = r.read_u32()? as usize;
    let mut deleted = Vec::with_capacity(deleted_len);
    for _ in 0..deleted_len {
      deleted.push(r.read_u8()? != 0);
    }
    let vector_count = r.read_u32()? as usize;
    let mut fragment = Fragment {
      id,
      state,
      row_groups: Vec::new(),
      deleted,
      total: 0,
      deleted_count,
      dimensions,
      row_group_size,
      target_size,
    };
    for _ in 0..vector_count {
      let mut v = Vec::with_capacity(dimensions);
      for _ in 0..dimensions {
        v.push(r.read_f32()?);
      }
      fragment.insert(&v, false);
    }
    fragment.total = total;
    fragment.deleted_count = deleted_count;
    if state == FragmentState::Sealed || state == FragmentState::Retired {
      if let Some(last) = fragment.row_groups.last_mut() {
        last.trim_to_count();
      }
    }
    Ok(fragment)
  }
}

fn fragment_state_from_u32(v: u32) -> FragmentState {
  match v {
    1 => FragmentState::Sealed,
    2 => FragmentState::SealedDraining,
    3 => FragmentState::Retired,
    _ => FragmentState::Active,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn insert_spans_multiple_row_groups() {
    let mut f = Fragment::new(0, 2, 4, 100);
    for i in 0..10 {
      let local = f.insert(&[i as f32, i as f32], false);
      assert_eq!(local, i);
    }
    assert_eq!(f.get(9), &[9.0, 9.0]);
  }

  #[test]
  fn tombstone_is_idempotent() {
    let mut f = Fragment::new(0, 2, 4, 100);
    f.insert(&[1.0, 2.0], false);
    f.tombstone(0);
    f.tombstone(0);
    assert_eq!(f.deleted_count, 1);
    assert!(f.is_deleted(0));
  }

  #[test]
  fn seal_trims_trailing_capacity() {
    let mut f = Fragment::new(0, 2, 4, 100);
    f.insert(&[1.0, 2.0], false);
    f.seal();
    assert_eq!(f.row_groups[0].data.len(), 2);
  }

  #[test]
  fn roundtrip_encode_decode() {
    let mut f = Fragment::new(7, 3, 2, 10);
    f.insert(&[1.0, 2.0, 3.0], false);
    f.insert(&[4.0, 5.0, 6.0], false);
    f.tombstone(0);
    f.seal();

    let mut buf = Vec::new();
    f.encode(&mut buf);
    let mut r = Reader::new(&buf);
    let decoded = Fragment::decode(&mut r).unwrap();

    assert_eq!(decoded.id, 7);
    assert_eq!(decoded.total, 2);
    assert_eq!(decoded.deleted_count, 1);
    assert!(decoded.is_deleted(0));
    assert_eq!(decoded.get(1), &[4.0, 5.0, 6.0]);
  }
}
