//! Byte cursors for NDR stub data
//!
//! [`NdrWriter`] and [`NdrReader`] wrap `bytes` buffers and track the
//! current offset from the start of the stub, which every alignment
//! computation is relative to. All multi-byte values are little-endian.

use crate::align::pad_before;
use crate::error::{NdrError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Output cursor.
///
/// A measuring writer keeps no bytes and only advances its position; it is
/// used to compute encoded sizes and layouts with the same code path as
/// real encoding.
#[derive(Debug, Default)]
pub struct NdrWriter {
    buf: Option<BytesMut>,
    position: usize,
}

macro_rules! put_le {
    ($name:ident, $ty:ty, $put:ident, $size:expr) => {
        #[inline]
        pub fn $name(&mut self, value: $ty) {
            if let Some(buf) = self.buf.as_mut() {
                buf.$put(value);
            }
            self.position += $size;
        }
    };
}

impl NdrWriter {
    pub fn new() -> Self {
        Self {
            buf: Some(BytesMut::new()),
            position: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Some(BytesMut::with_capacity(capacity)),
            position: 0,
        }
    }

    /// Writer that only counts bytes
    pub fn measuring() -> Self {
        Self {
            buf: None,
            position: 0,
        }
    }

    pub fn is_measuring(&self) -> bool {
        self.buf.is_none()
    }

    /// Offset from the start of the stub
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Write zero padding up to `alignment`, returning the padding length
    pub fn align(&mut self, alignment: usize) -> usize {
        let padding = pad_before(self.position, alignment);
        if let Some(buf) = self.buf.as_mut() {
            buf.put_bytes(0, padding);
        }
        self.position += padding;
        padding
    }

    put_le!(put_u8, u8, put_u8, 1);
    put_le!(put_u16, u16, put_u16_le, 2);
    put_le!(put_i16, i16, put_i16_le, 2);
    put_le!(put_u32, u32, put_u32_le, 4);
    put_le!(put_u64, u64, put_u64_le, 8);

    pub fn put_slice(&mut self, bytes: &[u8]) {
        if let Some(buf) = self.buf.as_mut() {
            buf.put_slice(bytes);
        }
        self.position += bytes.len();
    }

    /// Bytes written so far (empty for a measuring writer)
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.map(BytesMut::freeze).unwrap_or_default()
    }
}

/// Input cursor over any [`Buf`].
///
/// Reads never go past the end of the input: every getter checks the
/// remaining length first and reports the failing offset.
#[derive(Debug)]
pub struct NdrReader<B> {
    buf: B,
    position: usize,
}

macro_rules! get_le {
    ($name:ident, $ty:ty, $get:ident, $size:expr) => {
        #[inline]
        pub fn $name(&mut self) -> Result<$ty> {
            self.ensure($size)?;
            let value = self.buf.$get();
            self.position += $size;
            Ok(value)
        }
    };
}

impl<B: Buf> NdrReader<B> {
    pub fn new(buf: B) -> Self {
        Self { buf, position: 0 }
    }

    /// Offset from the start of the stub
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Fail unless at least `needed` bytes remain
    pub fn ensure(&self, needed: usize) -> Result<()> {
        let have = self.buf.remaining();
        if have < needed {
            return Err(NdrError::BufferUnderflow {
                position: self.position,
                needed,
                have,
            });
        }
        Ok(())
    }

    /// Skip padding up to `alignment`, returning the padding length
    pub fn align(&mut self, alignment: usize) -> Result<usize> {
        let padding = pad_before(self.position, alignment);
        self.ensure(padding)?;
        self.buf.advance(padding);
        self.position += padding;
        Ok(padding)
    }

    get_le!(get_u8, u8, get_u8, 1);
    get_le!(get_u16, u16, get_u16_le, 2);
    get_le!(get_i16, i16, get_i16_le, 2);
    get_le!(get_u32, u32, get_u32_le, 4);
    get_le!(get_u64, u64, get_u64_le, 8);

    pub fn get_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure(len)?;
        let mut bytes = vec![0u8; len];
        self.buf.copy_to_slice(&mut bytes);
        self.position += len;
        Ok(bytes)
    }

    pub fn into_inner(self) -> B {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_alignment_and_le() {
        let mut w = NdrWriter::new();
        w.put_u8(0x2C);
        assert_eq!(w.align(2), 1);
        w.put_u16(0x01BC);
        w.put_u32(0x115C);
        assert_eq!(w.position(), 8);
        assert_eq!(w.as_slice(), &[0x2C, 0, 0xBC, 0x01, 0x5C, 0x11, 0, 0]);
    }

    #[test]
    fn test_measuring_writer() {
        let mut w = NdrWriter::measuring();
        assert!(w.is_measuring());
        w.put_u8(1);
        w.align(8);
        w.put_u64(7);
        assert_eq!(w.position(), 16);
        assert!(w.into_bytes().is_empty());
    }

    #[test]
    fn test_reader_underflow_reports_position() {
        let data = [1u8, 0, 0, 0, 9];
        let mut r = NdrReader::new(&data[..]);
        assert_eq!(r.get_u32().unwrap(), 1);
        let err = r.get_u32().unwrap_err();
        assert!(matches!(
            err,
            NdrError::BufferUnderflow {
                position: 4,
                needed: 4,
                have: 1
            }
        ));
    }

    #[test]
    fn test_reader_align_needs_padding_bytes() {
        let data = [7u8];
        let mut r = NdrReader::new(&data[..]);
        r.get_u8().unwrap();
        assert!(r.align(4).is_err());
    }
}
