//! Alignment engine
//!
//! Every NDR type carries an alignment of 1, 2, 4 or 8 bytes. Padding before a
//! field is always zero-filled and computed relative to the start of the stub.

/// Number of zero bytes needed before a field aligned to `align` at `current_offset`.
#[inline]
pub fn pad_before(current_offset: usize, align: usize) -> usize {
    if align <= 1 {
        return 0;
    }
    let remainder = current_offset % align;
    if remainder == 0 {
        0
    } else {
        align - remainder
    }
}

/// Round `offset` up to the next multiple of `align`.
#[inline]
pub fn align_up(offset: usize, align: usize) -> usize {
    offset + pad_before(offset, align)
}

/// Alignment of the 4-byte size fields (max_count, offset, actual_count).
pub const SIZE_FIELD_ALIGN: usize = 4;

/// Alignment of a referent ID.
pub const POINTER_ALIGN: usize = 4;
