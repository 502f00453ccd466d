//! NDR scalar codec
//!
//! Fixed-width primitives and their wire representation. Every scalar is
//! little-endian and aligned to its own width:
//!
//! | Kind       | Rust type  | Size | Alignment |
//! |------------|------------|------|-----------|
//! | uint8      | u8         | 1    | 1         |
//! | uint16     | u16        | 2    | 2         |
//! | uint32     | u32        | 4    | 4         |
//! | uint64     | u64        | 8    | 8         |
//! | boolean    | bool       | 4    | 4         |
//! | char       | u8         | 1    | 1         |
//! | wchar_t    | u16        | 2    | 2         |
//! | enum16     | i16        | 2    | 2         |
//! | FILETIME   | FileTime   | 8    | 8         |
//!
//! Booleans are written as 0 or 1, and any non-zero value reads back as true.

use crate::decode::NdrDecode;
use crate::encode::NdrEncode;
use crate::stream::{NdrReader, NdrWriter};
use crate::Result;
use bytes::{Buf, Bytes};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

macro_rules! impl_ndr_scalar {
    ($ty:ty, $size:expr, $put:ident, $get:ident) => {
        impl NdrEncode for $ty {
            fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
                w.align($size);
                w.$put(*self);
                Ok(())
            }

            fn ndr_align() -> usize {
                $size
            }

            fn ndr_size(&self) -> usize {
                $size
            }
        }

        impl NdrDecode for $ty {
            fn ndr_decode<B: Buf>(r: &mut NdrReader<B>) -> Result<Self> {
                r.align($size)?;
                r.$get()
            }

            fn ndr_align() -> usize {
                $size
            }
        }
    };
}

impl_ndr_scalar!(u8, 1, put_u8, get_u8);
impl_ndr_scalar!(u16, 2, put_u16, get_u16);
impl_ndr_scalar!(i16, 2, put_i16, get_i16);
impl_ndr_scalar!(u32, 4, put_u32, get_u32);
impl_ndr_scalar!(u64, 8, put_u64, get_u64);

/// NDR boolean - a 32-bit value, 0 = false, anything else = true
impl NdrEncode for bool {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        u32::from(*self).ndr_encode(w)
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_size(&self) -> usize {
        4
    }
}

impl NdrDecode for bool {
    fn ndr_decode<B: Buf>(r: &mut NdrReader<B>) -> Result<Self> {
        Ok(u32::ndr_decode(r)? != 0)
    }

    fn ndr_align() -> usize {
        4
    }
}

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH_SECS: u64 = 11_644_473_600;
const FILETIME_TICKS_PER_SEC: u64 = 10_000_000;

/// Windows FILETIME: 100-nanosecond intervals since 1601-01-01 UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileTime(pub u64);

impl FileTime {
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Times before 1601 saturate to zero, times past the FILETIME range to
    /// `u64::MAX`
    pub fn from_system_time(time: SystemTime) -> Self {
        let epoch = Duration::from_secs(FILETIME_UNIX_EPOCH_SECS);
        let since_1601 = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => epoch.saturating_add(after),
            Err(before) => epoch.saturating_sub(before.duration()),
        };
        let ticks = since_1601
            .as_secs()
            .checked_mul(FILETIME_TICKS_PER_SEC)
            .and_then(|t| t.checked_add(u64::from(since_1601.subsec_nanos()) / 100))
            .unwrap_or(u64::MAX);
        Self(ticks)
    }

    pub fn to_system_time(self) -> SystemTime {
        let secs = self.0 / FILETIME_TICKS_PER_SEC;
        let nanos = (self.0 % FILETIME_TICKS_PER_SEC) * 100;
        let since_1601 = Duration::new(secs, nanos as u32);
        let epoch = Duration::from_secs(FILETIME_UNIX_EPOCH_SECS);
        if since_1601 >= epoch {
            UNIX_EPOCH + (since_1601 - epoch)
        } else {
            UNIX_EPOCH - (epoch - since_1601)
        }
    }
}

impl NdrEncode for FileTime {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        self.0.ndr_encode(w)
    }

    fn ndr_align() -> usize {
        8
    }

    fn ndr_size(&self) -> usize {
        8
    }
}

impl NdrDecode for FileTime {
    fn ndr_decode<B: Buf>(r: &mut NdrReader<B>) -> Result<Self> {
        Ok(Self(u64::ndr_decode(r)?))
    }

    fn ndr_align() -> usize {
        8
    }
}

/// Scalar kinds understood by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Boolean,
    Char,
    WideChar,
    Enum16,
    FileTime,
}

impl ScalarKind {
    /// Wire width in bytes
    pub const fn width(self) -> usize {
        match self {
            ScalarKind::Uint8 | ScalarKind::Char => 1,
            ScalarKind::Uint16 | ScalarKind::WideChar | ScalarKind::Enum16 => 2,
            ScalarKind::Uint32 | ScalarKind::Boolean => 4,
            ScalarKind::Uint64 | ScalarKind::FileTime => 8,
        }
    }

    /// Wire alignment; equal to the width for every scalar
    pub const fn align(self) -> usize {
        self.width()
    }

    pub const fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            ScalarKind::Uint8 | ScalarKind::Uint16 | ScalarKind::Uint32 | ScalarKind::Uint64
        )
    }

    pub fn default_value(self) -> Scalar {
        match self {
            ScalarKind::Uint8 => Scalar::Uint8(0),
            ScalarKind::Uint16 => Scalar::Uint16(0),
            ScalarKind::Uint32 => Scalar::Uint32(0),
            ScalarKind::Uint64 => Scalar::Uint64(0),
            ScalarKind::Boolean => Scalar::Boolean(false),
            ScalarKind::Char => Scalar::Char(0),
            ScalarKind::WideChar => Scalar::WideChar(0),
            ScalarKind::Enum16 => Scalar::Enum16(0),
            ScalarKind::FileTime => Scalar::FileTime(FileTime::default()),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ScalarKind::Uint8 => "uint8",
            ScalarKind::Uint16 => "uint16",
            ScalarKind::Uint32 => "uint32",
            ScalarKind::Uint64 => "uint64",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Char => "char",
            ScalarKind::WideChar => "wchar",
            ScalarKind::Enum16 => "enum16",
            ScalarKind::FileTime => "filetime",
        }
    }

    /// Read one scalar of this kind, aligned
    pub fn read<B: Buf>(self, r: &mut NdrReader<B>) -> Result<Scalar> {
        Ok(match self {
            ScalarKind::Uint8 => Scalar::Uint8(u8::ndr_decode(r)?),
            ScalarKind::Uint16 => Scalar::Uint16(u16::ndr_decode(r)?),
            ScalarKind::Uint32 => Scalar::Uint32(u32::ndr_decode(r)?),
            ScalarKind::Uint64 => Scalar::Uint64(u64::ndr_decode(r)?),
            ScalarKind::Boolean => Scalar::Boolean(bool::ndr_decode(r)?),
            ScalarKind::Char => Scalar::Char(u8::ndr_decode(r)?),
            ScalarKind::WideChar => Scalar::WideChar(u16::ndr_decode(r)?),
            ScalarKind::Enum16 => Scalar::Enum16(i16::ndr_decode(r)?),
            ScalarKind::FileTime => Scalar::FileTime(FileTime::ndr_decode(r)?),
        })
    }

    /// Decode a scalar from `bytes` at `cursor`, returning the value and the
    /// cursor after it. Alignment is relative to the start of `bytes`.
    pub fn decode_at(self, bytes: &[u8], cursor: usize) -> Result<(Scalar, usize)> {
        let tail = bytes.get(cursor..).unwrap_or(&[]);
        // Offset the reader so alignment stays relative to `bytes[0]`.
        let padding = crate::align::pad_before(cursor, self.align());
        if tail.len() < padding + self.width() {
            return Err(crate::NdrError::BufferUnderflow {
                position: cursor,
                needed: padding + self.width(),
                have: tail.len(),
            });
        }
        let mut r = NdrReader::new(&tail[padding..]);
        let value = self.read(&mut r)?;
        Ok((value, cursor + padding + self.width()))
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed scalar value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scalar {
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Boolean(bool),
    /// One narrow code unit
    Char(u8),
    /// One UTF-16 code unit
    WideChar(u16),
    Enum16(i16),
    FileTime(FileTime),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Uint8(_) => ScalarKind::Uint8,
            Scalar::Uint16(_) => ScalarKind::Uint16,
            Scalar::Uint32(_) => ScalarKind::Uint32,
            Scalar::Uint64(_) => ScalarKind::Uint64,
            Scalar::Boolean(_) => ScalarKind::Boolean,
            Scalar::Char(_) => ScalarKind::Char,
            Scalar::WideChar(_) => ScalarKind::WideChar,
            Scalar::Enum16(_) => ScalarKind::Enum16,
            Scalar::FileTime(_) => ScalarKind::FileTime,
        }
    }

    /// Narrow character from the first code unit of `s`; the rest is dropped
    pub fn char_from_str(s: &str) -> Self {
        Scalar::Char(s.as_bytes().first().copied().unwrap_or(0))
    }

    /// Wide character from the first UTF-16 code unit of `s`; the rest is dropped
    pub fn wide_char_from_str(s: &str) -> Self {
        Scalar::WideChar(s.encode_utf16().next().unwrap_or(0))
    }

    /// Integer value of an integer-like scalar
    pub fn as_integer(&self) -> Option<i128> {
        match *self {
            Scalar::Uint8(v) => Some(v.into()),
            Scalar::Uint16(v) => Some(v.into()),
            Scalar::Uint32(v) => Some(v.into()),
            Scalar::Uint64(v) => Some(v.into()),
            Scalar::Enum16(v) => Some(v.into()),
            _ => None,
        }
    }

    /// Write this scalar, aligned
    pub fn write(&self, w: &mut NdrWriter) -> Result<()> {
        w.align(self.kind().align());
        self.put(w);
        Ok(())
    }

    /// Wire bytes of this scalar without leading padding
    pub fn to_bytes(&self) -> Bytes {
        let mut w = NdrWriter::with_capacity(self.kind().width());
        self.put(&mut w);
        w.into_bytes()
    }

    fn put(&self, w: &mut NdrWriter) {
        match *self {
            Scalar::Uint8(v) | Scalar::Char(v) => w.put_u8(v),
            Scalar::Uint16(v) | Scalar::WideChar(v) => w.put_u16(v),
            Scalar::Uint32(v) => w.put_u32(v),
            Scalar::Uint64(v) => w.put_u64(v),
            Scalar::Boolean(v) => w.put_u32(u32::from(v)),
            Scalar::Enum16(v) => w.put_i16(v),
            Scalar::FileTime(v) => w.put_u64(v.ticks()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Uint8(v) => write!(f, "{v}"),
            Scalar::Uint16(v) => write!(f, "{v}"),
            Scalar::Uint32(v) => write!(f, "{v}"),
            Scalar::Uint64(v) => write!(f, "{v}"),
            Scalar::Boolean(v) => write!(f, "{v}"),
            Scalar::Char(v) => write!(f, "'{}'", char::from(*v)),
            Scalar::WideChar(v) => match char::from_u32(u32::from(*v)) {
                Some(c) => write!(f, "'{c}'"),
                None => write!(f, "U+{v:04X}"),
            },
            Scalar::Enum16(v) => write!(f, "{v}"),
            Scalar::FileTime(v) => write!(f, "filetime({})", v.0),
        }
    }
}
