//! NDR encoding trait

use crate::stream::NdrWriter;
use crate::Result;
use bytes::Bytes;

/// Trait for Rust types with a fixed NDR wire representation
pub trait NdrEncode {
    /// Encode this value at the writer's current position, including any
    /// alignment padding the type requires.
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()>;

    /// Get the NDR alignment requirement for this type
    fn ndr_align() -> usize
    where
        Self: Sized,
    {
        1
    }

    /// Compute the encoded size (not including alignment padding from previous fields)
    fn ndr_size(&self) -> usize;
}

/// Encode a single value as a standalone stub starting at offset 0
pub fn to_ndr_bytes<T: NdrEncode + ?Sized>(value: &T) -> Result<Bytes> {
    let mut w = NdrWriter::with_capacity(value.ndr_size());
    value.ndr_encode(&mut w)?;
    Ok(w.into_bytes())
}
