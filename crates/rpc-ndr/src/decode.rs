//! NDR decoding trait

use crate::stream::NdrReader;
use crate::Result;
use bytes::Buf;

/// Trait for Rust types that can be decoded from a fixed NDR wire representation
pub trait NdrDecode: Sized {
    /// Decode a value at the reader's current position, skipping alignment
    /// padding first.
    fn ndr_decode<B: Buf>(r: &mut NdrReader<B>) -> Result<Self>;

    /// Get the NDR alignment requirement for this type
    fn ndr_align() -> usize {
        1
    }
}

/// Decode a single value from the start of `bytes`, returning it with the
/// number of bytes consumed
pub fn from_ndr_bytes<T: NdrDecode>(bytes: &[u8]) -> Result<(T, usize)> {
    let mut r = NdrReader::new(bytes);
    let value = T::ndr_decode(&mut r)?;
    Ok((value, r.position()))
}
