//! NDR array codec
//!
//! NDR supports several array types:
//!
//! - Fixed arrays: size fixed by the schema, no prefix
//! - Conformant arrays: `max_count` prefix
//! - Varying arrays: `offset` and `actual_count` prefix
//! - Conformant varying arrays: all three
//!
//! Wire format of a conformant varying array:
//! ```text
//! max_count: u32      # hoisted to the enclosing structure when embedded
//! offset: u32         # always 0
//! actual_count: u32
//! elements[actual_count]
//! ```
//!
//! Size fields are 4-byte aligned; element data is aligned to
//! `max(4, element alignment)` when the array has a prefix and to the
//! element alignment otherwise. Empty arrays write their size fields and
//! nothing else.

use crate::align::SIZE_FIELD_ALIGN;
use crate::context::{Marshaller, Unmarshaller};
use crate::error::{NdrError, Result};
use crate::schema::{ArrayKind, ArrayType};
use crate::value::NdrValue;
use bytes::Buf;

impl<'v> Marshaller<'v> {
    /// Write the size fields for `count` elements. The `max_count` of a
    /// conformant kind is skipped when it was hoisted.
    pub(crate) fn encode_size_header(&mut self, kind: ArrayKind, count: usize, hoisted: bool) -> Result<()> {
        let count = u32::try_from(count).map_err(|_| NdrError::IntegerOverflow)?;
        if kind.is_conformant() && !hoisted {
            self.writer.align(SIZE_FIELD_ALIGN);
            self.writer.put_u32(count);
        }
        if kind.is_varying() {
            self.writer.align(SIZE_FIELD_ALIGN);
            self.writer.put_u32(0);
            self.writer.put_u32(count);
        }
        Ok(())
    }

    pub(crate) fn encode_array(&mut self, at: &'v ArrayType, items: &'v [NdrValue], hoisted: bool) -> Result<()> {
        if let ArrayKind::Fixed(len) = at.kind {
            if items.len() > len {
                return Err(NdrError::FixedLengthExceeded {
                    limit: len,
                    got: items.len(),
                });
            }
            if items.len() < len {
                return Err(NdrError::TypeMismatch {
                    expected: format!("{len} elements"),
                    got: format!("{} elements", items.len()),
                });
            }
        }

        self.encode_size_header(at.kind, items.len(), hoisted)?;
        if items.is_empty() {
            return Ok(());
        }
        self.writer.align(at.element_align());
        for item in items {
            self.encode_value(&at.element, item, false)?;
        }
        Ok(())
    }
}

impl<'s, B: Buf> Unmarshaller<'s, B> {
    /// Read the size fields of `kind` and return the number of elements
    /// that follow.
    pub(crate) fn decode_size_header(&mut self, kind: ArrayKind, hoisted: Option<u32>) -> Result<usize> {
        let max_count = if kind.is_conformant() {
            match hoisted {
                Some(max_count) => Some(max_count),
                None => {
                    self.reader.align(SIZE_FIELD_ALIGN)?;
                    Some(self.reader.get_u32()?)
                }
            }
        } else {
            None
        };

        let count = if kind.is_varying() {
            self.reader.align(SIZE_FIELD_ALIGN)?;
            let position = self.reader.position();
            let offset = self.reader.get_u32()?;
            if offset != 0 {
                return Err(NdrError::NonZeroOffset { offset, position });
            }
            let actual_count = self.reader.get_u32()?;
            if let Some(max_count) = max_count {
                if actual_count > max_count {
                    return Err(NdrError::ConformanceMismatch {
                        max_count,
                        actual_count,
                    });
                }
            }
            actual_count as usize
        } else {
            match (kind, max_count) {
                (ArrayKind::Fixed(len), _) => len,
                (_, Some(max_count)) => max_count as usize,
                (_, None) => 0,
            }
        };
        Ok(count)
    }

    /// Reject element counts that exceed the configured limit or cannot fit
    /// in the remaining input
    pub(crate) fn check_count(&self, count: usize, min_element_size: usize) -> Result<()> {
        let limit = self.config.max_elements;
        if count > limit {
            return Err(NdrError::AllocationLimitExceeded {
                requested: count,
                limit,
            });
        }
        // Zero-sized elements still cost at least a byte of input each
        let needed = count
            .checked_mul(min_element_size.max(1))
            .ok_or(NdrError::IntegerOverflow)?;
        self.reader.ensure(needed)
    }

    pub(crate) fn decode_array(&mut self, at: &'s ArrayType, hoisted: Option<u32>) -> Result<Vec<NdrValue>> {
        let count = self.decode_size_header(at.kind, hoisted)?;
        self.check_count(count, at.element.min_wire_size())?;
        if count == 0 {
            return Ok(Vec::new());
        }

        self.reader.align(at.element_align())?;
        let mut items = Vec::with_capacity(count);
        for index in 0..count {
            self.path.push(index);
            let item = self.decode_value(&at.element, None);
            self.path.pop();
            items.push(item?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::NdrConfig;
    use crate::context::{decode, encode, Unmarshaller};
    use crate::error::NdrError;
    use crate::schema::{NdrType, StructBuilder};
    use crate::value::NdrValue;

    #[test]
    fn test_conformant_array_wire_format() {
        let ty = NdrType::conformant_array(NdrType::uint16());
        let value = NdrValue::from(vec![1u16, 2, 3]);
        let bytes = encode(&ty, &value).unwrap();
        assert_eq!(
            &bytes[..],
            &[3, 0, 0, 0, 1, 0, 2, 0, 3, 0]
        );
        let (decoded, used) = decode(&ty, &bytes).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(used, 10);
    }

    #[test]
    fn test_varying_array_wire_format() {
        let ty = NdrType::varying_array(NdrType::uint8());
        let value = NdrValue::from(vec![0xAAu8, 0xBB]);
        let bytes = encode(&ty, &value).unwrap();
        assert_eq!(&bytes[..], &[0, 0, 0, 0, 2, 0, 0, 0, 0xAA, 0xBB]);
        assert_eq!(decode(&ty, &bytes).unwrap().0, value);
    }

    #[test]
    fn test_conformant_varying_array_wire_format() {
        let ty = NdrType::conformant_varying_array(NdrType::uint32());
        let value = NdrValue::from(vec![9u32]);
        let bytes = encode(&ty, &value).unwrap();
        assert_eq!(
            &bytes[..],
            &[1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 9, 0, 0, 0]
        );
        assert_eq!(decode(&ty, &bytes).unwrap().0, value);
    }

    #[test]
    fn test_fixed_array_has_no_prefix() {
        let ty = NdrType::fixed_array(NdrType::uint16(), 3);
        let value = NdrValue::from(vec![1u16, 2, 3]);
        let bytes = encode(&ty, &value).unwrap();
        assert_eq!(&bytes[..], &[1, 0, 2, 0, 3, 0]);
        assert_eq!(decode(&ty, &bytes).unwrap(), (value, 6));

        let short = NdrValue::from(vec![1u16]);
        assert!(encode(&ty, &short).is_err());
    }

    #[test]
    fn test_empty_arrays_write_only_size_fields() {
        let ty = NdrType::conformant_varying_array(NdrType::uint64());
        let empty = NdrValue::Array(vec![]);
        let bytes = encode(&ty, &empty).unwrap();
        assert_eq!(bytes.len(), 12);
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(decode(&ty, &bytes).unwrap(), (empty, 12));
    }

    #[test]
    fn test_element_data_aligned_to_element() {
        let ty = NdrType::conformant_array(NdrType::uint64());
        let value = NdrValue::from(vec![1u64]);
        let bytes = encode(&ty, &value).unwrap();
        // max_count, 4 bytes padding to 8, element
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..8], &[1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_array_of_structs() {
        let point = StructBuilder::new("Point")
            .field("x", NdrType::uint16())
            .field("y", NdrType::uint8())
            .build()
            .unwrap();
        let ty = NdrType::conformant_array(NdrType::Struct(point.clone()));
        let value = NdrValue::from(vec![
            point.new_value().with("x", 1u16).unwrap().with("y", 2u8).unwrap(),
            point.new_value().with("x", 3u16).unwrap().with("y", 4u8).unwrap(),
        ]);
        let bytes = encode(&ty, &value).unwrap();
        assert_eq!(
            &bytes[..],
            &[2, 0, 0, 0, 1, 0, 2, 0, 3, 0, 4]
        );
        assert_eq!(decode(&ty, &bytes).unwrap().0, value);
    }

    #[test]
    fn test_nonzero_offset_rejected() {
        let ty = NdrType::varying_array(NdrType::uint8());
        let bytes = [1, 0, 0, 0, 1, 0, 0, 0, 7];
        assert!(matches!(
            decode(&ty, &bytes),
            Err(NdrError::NonZeroOffset { offset: 1, position: 0 })
        ));
    }

    #[test]
    fn test_actual_count_above_max_count_rejected() {
        let ty = NdrType::conformant_varying_array(NdrType::uint8());
        let bytes = [1, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 7, 8];
        assert!(matches!(
            decode(&ty, &bytes),
            Err(NdrError::ConformanceMismatch {
                max_count: 1,
                actual_count: 2
            })
        ));
    }

    #[test]
    fn test_declared_count_checked_against_input() {
        let ty = NdrType::conformant_array(NdrType::uint32());
        let bytes = [0xFF, 0xFF, 0x00, 0x00, 1, 0, 0, 0];
        assert!(matches!(decode(&ty, &bytes), Err(NdrError::BufferUnderflow { .. })));
    }

    #[test]
    fn test_zero_sized_elements_checked_against_input() {
        let empty = StructBuilder::new("Empty").build().unwrap();
        let ty = NdrType::conformant_array(NdrType::Struct(empty));
        let bytes = [0x00, 0x00, 0x00, 0x01];
        assert!(matches!(decode(&ty, &bytes), Err(NdrError::BufferUnderflow { .. })));
    }

    #[test]
    fn test_allocation_limit() {
        let ty = NdrType::conformant_array(NdrType::uint8());
        let bytes = [4, 0, 0, 0, 1, 2, 3, 4];
        let mut u = Unmarshaller::with_config(&bytes[..], NdrConfig::new().with_max_elements(3));
        assert!(matches!(
            u.pull(&ty),
            Err(NdrError::AllocationLimitExceeded {
                requested: 4,
                limit: 3
            })
        ));
    }
}
