//! Little-endian binary encoding helpers.

use crate::error::{RayError, Result};
use byteorder::{ByteOrder, LittleEndian};

pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
  let mut tmp = [0u8; 4];
  LittleEndian::write_u32(&mut tmp, v);
  buf.extend_from_slice(&tmp);
}

pub fn write_u64(buf: &mut Vec<u8>, v: u64) {
  let mut tmp = [0u8; 8];
  LittleEndian::write_u64(&mut tmp, v);
  buf.extend_from_slice(&tmp);
}

pub fn write_i64(buf: &mut Vec<u8>, v: i64) {
  let mut tmp = [0u8; 8];
  LittleEndian::write_i64(&mut tmp, v);
  buf.extend_from_slice(&tmp);
}

pub fn write_f64(buf: &mut Vec<u8>, v: f64) {
  let mut tmp = [0u8; 8];
  LittleEndian::write_f64(&mut tmp, v);
  buf.extend_from_slice(&tmp);
}

pub fn write_f32(buf: &mut Vec<u8>, v: f32) {
  let mut tmp = [0u8; 4];
  LittleEndian::write_f32(&mut tmp, v);
  buf.extend_from_slice(&tmp);
}

pub fn write_u8(buf: &mut Vec<u8>, v: u8) {
  buf.push(v);
}

pub fn write_string(buf: &mut Vec<u8>, s: &str) {
  write_u32(buf, s.len() as u32);
  buf.extend_from_slice(s.as_bytes());
}

pub fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
  write_u32(buf, bytes.len() as u32);
  buf.extend_from_slice(bytes);
}

/// A forward-only cursor over a byte slice used when decoding records.
pub struct Reader<'a> {
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> Reader<'a> {
  pub fn new(bytes: &'a [u8]) -> Self {
    Self { bytes, pos: 0 }
  }

  pub fn remaining(&self) -> usize {
    self.bytes.len() - self.pos
  }

  pub fn pos(&self) -> usize {
    self.pos
  }

  fn need(&self, n: usize) -> Result<()> {
    if self.remaining() < n {
      return Err(RayError::InvalidArgument(format!(
        "buffer underrun: need {n} bytes, have {}",
        self.remaining()
      )));
    }
    Ok(())
  }

  pub fn read_u8(&mut self) -> Result<u8> {
    self.need(1)?;
    let v = self.bytes[self.pos];
    self.pos += 1;
    Ok(v)
  }

  pub fn read_u32(&mut self) -> Result<u32> {
    self.need(4)?;
    let v = LittleEndian::read_u32(&self.bytes[self.pos..self.pos + 4]);
    self.pos += 4;
    Ok(v)
  }

  pub fn read_u64(&mut self) -> Result<u64> {
    self.need(8)?;
    let v = LittleEndian::read_u64(&self.bytes[self.pos..self.pos + 8]);
    self.pos += 8;
    Ok(v)
  }

  pub fn read_i64(&mut self) -> Result<i64> {
    self.need(8)?;
    let v = LittleEndian::read_i64(&self.bytes[self.pos..self.pos + 8]);
    self.pos += 8;
    Ok(v)
  }

  pub fn read_f64(&mut self) -> Result<f64> {
    self.need(8)?;
    let v = LittleEndian::read_f64(&self.bytes[self.pos..self.pos + 8]);
    self.pos += 8;
    Ok(v)
  }

  pub fn read_f32(&mut self) -> Result<f32> {
    self.need(4)?;
    let v = LittleEndian::read_f32(&self.bytes[self.pos..self.pos + 4]);
    self.pos += 4;
    Ok(v)
  }

  pub fn read_string(&mut self) -> Result<String> {
    let len = self.read_u32()? as usize;
    self.need(len)?;
    let s = std::str::from_utf8(&self.bytes[self.pos..self.pos + len])
      .map_err(|e| RayError::InvalidArgument(format!("invalid utf8 string: {e}")))?
      .to_string();
    self.pos += len;
    Ok(s)
  }

  pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
    self.need(len)?;
    let v = &self.bytes[self.pos..self.pos + len];
    self.pos += len;
    Ok(v)
  }

  pub fn read_length_prefixed_bytes(&mut self) -> Result<&'a [u8]> {
    let len = self.read_u32()? as usize;
    self.read_bytes(len)
  }
}

pub fn read_u32_at(bytes: &[u8], offset: usize) -> Result<u32> {
  if bytes.len() < offset + 4 {
    return Err(RayError::InvalidArgument("read_u32_at out of bounds".into()));
  }
  Ok(LittleEndian::read_u32(&bytes[offset..offset + 4]))
}

pub fn read_u64_at(bytes: &[u8], offset: usize) -> Result<u64> {
  if bytes.len() < offset + 8 {
    return Err(RayError::InvalidArgument("read_u64_at out of bounds".into()));
  }
  Ok(LittleEndian::read_u64(&bytes[offset..offset + 8]))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roundtrip_scalars() {
    let mut buf = Vec::new();
    write_u32(&mut buf, 42);
    write_u64(&mut buf, 1_000_000_000_000);
    write_i64(&mut buf, -7);
    write_f64(&mut buf, 3.5);
    write_string(&mut buf, "hello");

    let mut r = Reader::new(&buf);
    assert_eq!(r.read_u32().unwrap(), 42);
    assert_eq!(r.read_u64().unwrap(), 1_000_000_000_000);
    assert_eq!(r.read_i64().unwrap(), -7);
    assert_eq!(r.read_f64().unwrap(), 3.5);
    assert_eq!(r.read_string().unwrap(), "hello");
    assert_eq!(r.remaining(), 0);
  }

  #[test]
  fn reader_detects_underrun() {
    let buf = vec![1, 2, 3];
    let mut r = Reader::new(&buf);
    assert!(r.read_u64().is_err());
  }
}
