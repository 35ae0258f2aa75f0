use crate::models::{Quaternion, Vector3};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated frame: needed {needed} bytes at offset {offset}")]
    TruncatedFrame { offset: usize, needed: usize },
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("invalid string payload")]
    InvalidString,
}

/// Little-endian byte writer. Encoding is infallible for well-formed
/// values; string lengths are capped at u16::MAX bytes by the protocol.
#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        debug_assert!(bytes.len() <= u16::MAX as usize);
        self.put_u16(bytes.len() as u16);
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_opt_string(&mut self, s: &Option<String>) {
        match s {
            Some(s) => {
                self.put_u8(1);
                self.put_string(s);
            }
            None => self.put_u8(0),
        }
    }

    pub fn put_vector3(&mut self, v: &Vector3) {
        self.put_f32(v.x);
        self.put_f32(v.y);
        self.put_f32(v.z);
    }

    pub fn put_quaternion(&mut self, q: &Quaternion) {
        self.put_f32(q.x);
        self.put_f32(q.y);
        self.put_f32(q.z);
        self.put_f32(q.w);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Bounds-checked little-endian reader over a frame slice. Never reads
/// beyond the end of the slice it was constructed with.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::TruncatedFrame {
                offset: self.pos,
                needed: n,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn get_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn get_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn get_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_string(&mut self) -> Result<String, DecodeError> {
        let len = self.get_u16()? as usize;
        if self.remaining() < len {
            // a length overrunning the frame is a string error, not a
            // truncation: the header itself lied
            return Err(DecodeError::InvalidString);
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidString)
    }

    pub fn get_opt_string(&mut self) -> Result<Option<String>, DecodeError> {
        match self.get_u8()? {
            0 => Ok(None),
            _ => Ok(Some(self.get_string()?)),
        }
    }

    pub fn get_vector3(&mut self) -> Result<Vector3, DecodeError> {
        Ok(Vector3::new(
            self.get_f32()?,
            self.get_f32()?,
            self.get_f32()?,
        ))
    }

    pub fn get_quaternion(&mut self) -> Result<Quaternion, DecodeError> {
        Ok(Quaternion::new(
            self.get_f32()?,
            self.get_f32()?,
            self.get_f32()?,
            self.get_f32()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_round_trip() {
        let mut w = ByteWriter::new();
        w.put_u8(7);
        w.put_u16(65534);
        w.put_u32(123_456_789);
        w.put_u64(9_876_543_210);
        w.put_f32(1.5);
        w.put_f64(-2.25);
        w.put_string("héllo");
        w.put_opt_string(&None);
        w.put_opt_string(&Some("x".to_string()));
        let bytes = w.into_bytes();

        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.get_u8().unwrap(), 7);
        assert_eq!(r.get_u16().unwrap(), 65534);
        assert_eq!(r.get_u32().unwrap(), 123_456_789);
        assert_eq!(r.get_u64().unwrap(), 9_876_543_210);
        assert_eq!(r.get_f32().unwrap(), 1.5);
        assert_eq!(r.get_f64().unwrap(), -2.25);
        assert_eq!(r.get_string().unwrap(), "héllo");
        assert_eq!(r.get_opt_string().unwrap(), None);
        assert_eq!(r.get_opt_string().unwrap(), Some("x".to_string()));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_truncated_read() {
        let mut r = ByteReader::new(&[1, 2]);
        assert!(matches!(
            r.get_u32(),
            Err(DecodeError::TruncatedFrame { .. })
        ));
    }

    #[test]
    fn test_string_length_overrun() {
        // declared length 10, only 2 bytes follow
        let mut w = ByteWriter::new();
        w.put_u16(10);
        w.put_u8(b'a');
        w.put_u8(b'b');
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.get_string(), Err(DecodeError::InvalidString));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut w = ByteWriter::new();
        w.put_u16(2);
        w.put_u8(0xff);
        w.put_u8(0xfe);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.get_string(), Err(DecodeError::InvalidString));
    }
}
