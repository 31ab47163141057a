//! Big-endian byte cursor primitives shared by every codec.
//!
//! `ByteWriter` has a hard capacity: a write that would exceed it fails with
//! `LexisError::BufferOverflow` instead of growing. Callers that want a
//! growable buffer use [`ByteWriter::unbounded`]; the vertex encoder starts
//! small and retries on overflow.
//!
//! `ByteReader` never panics on short input; every read is bounds-checked
//! and reports `LexisError::Malformed`.

use crate::primitives::{MAX_ENCODED_SIZE, UUID_KEY_LEN};
use crate::types::LexisError;
use uuid::Uuid;

// =============================================================================
// WRITER
// =============================================================================

/// A bounded big-endian writer.
#[derive(Debug)]
pub struct ByteWriter {
    buf: Vec<u8>,
    capacity: usize,
}

impl ByteWriter {
    /// A writer bounded only by `MAX_ENCODED_SIZE`.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            buf: Vec::new(),
            capacity: MAX_ENCODED_SIZE,
        }
    }

    /// A writer that fails once `capacity` bytes have been written.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn reserve(&mut self, additional: usize) -> Result<(), LexisError> {
        let needed = self.buf.len().saturating_add(additional);
        if needed > self.capacity {
            return Err(LexisError::BufferOverflow {
                needed,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> Result<(), LexisError> {
        self.reserve(1)?;
        self.buf.push(value);
        Ok(())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<(), LexisError> {
        self.put_slice(&value.to_be_bytes())
    }

    pub fn put_i32(&mut self, value: i32) -> Result<(), LexisError> {
        self.put_slice(&value.to_be_bytes())
    }

    pub fn put_i64(&mut self, value: i64) -> Result<(), LexisError> {
        self.put_slice(&value.to_be_bytes())
    }

    pub fn put_f32(&mut self, value: f32) -> Result<(), LexisError> {
        self.put_u32(value.to_bits())
    }

    pub fn put_f64(&mut self, value: f64) -> Result<(), LexisError> {
        self.put_slice(&value.to_bits().to_be_bytes())
    }

    pub fn put_uuid(&mut self, value: &Uuid) -> Result<(), LexisError> {
        self.put_slice(value.as_bytes())
    }

    /// Write a `u32` length or count prefix.
    pub fn put_len(&mut self, len: usize) -> Result<(), LexisError> {
        let len = u32::try_from(len)
            .map_err(|_| LexisError::Malformed(format!("length {} exceeds u32", len)))?;
        self.put_u32(len)
    }

    /// Write a length-prefixed byte run.
    pub fn put_prefixed(&mut self, bytes: &[u8]) -> Result<(), LexisError> {
        self.put_len(bytes.len())?;
        self.put_slice(bytes)
    }

    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<(), LexisError> {
        self.reserve(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// =============================================================================
// READER
// =============================================================================

/// A bounds-checked big-endian reader over a borrowed slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    /// Current offset from the start of the input.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Consume exactly `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], LexisError> {
        if n > self.remaining() {
            return Err(LexisError::Malformed(format!(
                "need {} bytes at offset {}, only {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], LexisError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, LexisError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn get_u32(&mut self) -> Result<u32, LexisError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn get_i32(&mut self) -> Result<i32, LexisError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn get_i64(&mut self) -> Result<i64, LexisError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn get_f32(&mut self) -> Result<f32, LexisError> {
        Ok(f32::from_bits(self.get_u32()?))
    }

    pub fn get_f64(&mut self) -> Result<f64, LexisError> {
        Ok(f64::from_bits(u64::from_be_bytes(self.take_array()?)))
    }

    pub fn get_uuid(&mut self) -> Result<Uuid, LexisError> {
        Ok(Uuid::from_bytes(self.take_array::<UUID_KEY_LEN>()?))
    }

    /// Read a length-prefixed byte run.
    pub fn get_prefixed(&mut self) -> Result<&'a [u8], LexisError> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    /// Read an element count, rejecting counts that cannot possibly fit in
    /// the remaining input given each element takes at least `min_element_len`
    /// bytes.
    pub fn get_count(&mut self, min_element_len: usize) -> Result<usize, LexisError> {
        let count = self.get_u32()? as usize;
        let min_total = count.saturating_mul(min_element_len.max(1));
        if min_total > self.remaining() {
            return Err(LexisError::Malformed(format!(
                "count {} at offset {} cannot fit in {} remaining bytes",
                count,
                self.pos,
                self.remaining()
            )));
        }
        Ok(count)
    }

    /// Fail unless all input has been consumed.
    pub fn expect_end(&self) -> Result<(), LexisError> {
        if self.remaining() != 0 {
            return Err(LexisError::Malformed(format!(
                "{} trailing bytes at offset {}",
                self.remaining(),
                self.pos
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_is_big_endian() {
        let mut writer = ByteWriter::unbounded();
        writer.put_i32(1).expect("i32");
        writer.put_u32(0x0102_0304).expect("u32");
        assert_eq!(writer.into_bytes(), vec![0, 0, 0, 1, 1, 2, 3, 4]);
    }

    #[test]
    fn bounded_writer_reports_overflow() {
        let mut writer = ByteWriter::with_capacity(6);
        writer.put_i32(7).expect("fits");
        let result = writer.put_i32(8);
        assert!(matches!(
            result,
            Err(LexisError::BufferOverflow {
                needed: 8,
                capacity: 6
            })
        ));
        // Failed write leaves the buffer untouched.
        assert_eq!(writer.len(), 4);
    }

    #[test]
    fn reader_rejects_short_input() {
        let mut reader = ByteReader::new(&[0, 0, 1]);
        assert!(matches!(reader.get_i32(), Err(LexisError::Malformed(_))));
    }

    #[test]
    fn reader_rejects_impossible_count() {
        let mut writer = ByteWriter::unbounded();
        writer.put_u32(1_000_000).expect("count");
        writer.put_i32(1).expect("one element");
        let bytes = writer.into_bytes();

        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(reader.get_count(4), Err(LexisError::Malformed(_))));
    }

    #[test]
    fn reader_detects_trailing_bytes() {
        let reader = ByteReader::new(&[1]);
        assert!(reader.expect_end().is_err());
        let reader = ByteReader::new(&[]);
        assert!(reader.expect_end().is_ok());
    }

    #[test]
    fn floats_keep_exact_bits() {
        let mut writer = ByteWriter::unbounded();
        writer.put_f64(f64::MIN_POSITIVE).expect("f64");
        writer.put_f32(-0.0).expect("f32");
        let bytes = writer.into_bytes();

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.get_f64().expect("f64").to_bits(), f64::MIN_POSITIVE.to_bits());
        assert_eq!(reader.get_f32().expect("f32").to_bits(), (-0.0f32).to_bits());
    }
}
