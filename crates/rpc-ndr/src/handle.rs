//! Context handles and UUIDs
//!
//! A context handle is the opaque 20-byte token an RPC server hands out to
//! identify per-client state (an open registry key, a service manager
//! session, ...). The codec carries it by value and never interprets it.

use crate::decode::NdrDecode;
use crate::encode::NdrEncode;
use crate::stream::{NdrReader, NdrWriter};
use crate::Result;
use bytes::Buf;
use std::fmt;

/// GUID/UUID in NDR layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NdrUuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl NdrUuid {
    /// Nil UUID
    pub const NIL: Self = Self {
        data1: 0,
        data2: 0,
        data3: 0,
        data4: [0; 8],
    };

    /// Parse from string "xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx"
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() != 36 {
            return None;
        }
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 5 || parts[4].len() != 12 {
            return None;
        }

        let data1 = u32::from_str_radix(parts[0], 16).ok()?;
        let data2 = u16::from_str_radix(parts[1], 16).ok()?;
        let data3 = u16::from_str_radix(parts[2], 16).ok()?;
        let clock = u16::from_str_radix(parts[3], 16).ok()?;

        let mut data4 = [0u8; 8];
        data4[..2].copy_from_slice(&clock.to_be_bytes());
        for (i, byte) in data4[2..].iter_mut().enumerate() {
            *byte = u8::from_str_radix(parts[4].get(i * 2..i * 2 + 2)?, 16).ok()?;
        }

        Some(Self {
            data1,
            data2,
            data3,
            data4,
        })
    }

    /// Wire bytes (little-endian fields)
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&self.data1.to_le_bytes());
        out[4..6].copy_from_slice(&self.data2.to_le_bytes());
        out[6..8].copy_from_slice(&self.data3.to_le_bytes());
        out[8..].copy_from_slice(&self.data4);
        out
    }

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

impl fmt::Display for NdrUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-",
            self.data1, self.data2, self.data3, self.data4[0], self.data4[1],
        )?;
        for byte in &self.data4[2..] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl NdrEncode for NdrUuid {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        // UUID aligns to 4 bytes (same as first field)
        w.align(4);
        w.put_u32(self.data1);
        w.put_u16(self.data2);
        w.put_u16(self.data3);
        w.put_slice(&self.data4);
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_size(&self) -> usize {
        16
    }
}

impl NdrDecode for NdrUuid {
    fn ndr_decode<B: Buf>(r: &mut NdrReader<B>) -> Result<Self> {
        r.align(4)?;
        r.ensure(16)?;
        let data1 = r.get_u32()?;
        let data2 = r.get_u16()?;
        let data3 = r.get_u16()?;
        let mut data4 = [0u8; 8];
        data4.copy_from_slice(&r.get_bytes(8)?);

        Ok(Self {
            data1,
            data2,
            data3,
            data4,
        })
    }

    fn ndr_align() -> usize {
        4
    }
}

/// Opaque RPC context handle: attribute word plus UUID, 20 bytes on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContextHandle {
    pub attributes: u32,
    pub uuid: NdrUuid,
}

impl ContextHandle {
    pub const SIZE: usize = 20;

    pub fn new(attributes: u32, uuid: NdrUuid) -> Self {
        Self { attributes, uuid }
    }

    /// Servers return an all-zero handle when closing one
    pub fn is_null(&self) -> bool {
        self.attributes == 0 && self.uuid.is_nil()
    }
}

impl NdrEncode for ContextHandle {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        self.attributes.ndr_encode(w)?;
        self.uuid.ndr_encode(w)
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_size(&self) -> usize {
        Self::SIZE
    }
}

impl NdrDecode for ContextHandle {
    fn ndr_decode<B: Buf>(r: &mut NdrReader<B>) -> Result<Self> {
        r.align(4)?;
        r.ensure(Self::SIZE)?;
        let attributes = u32::ndr_decode(r)?;
        let uuid = NdrUuid::ndr_decode(r)?;
        Ok(Self { attributes, uuid })
    }

    fn ndr_align() -> usize {
        4
    }
}
