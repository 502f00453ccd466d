//! NDR string codec
//!
//! Strings use the array size schemes over narrow (UTF-8 byte) or wide
//! (UTF-16LE) code units. `[string] wchar_t*` is the common case:
//!
//! ```text
//! max_count: u32    # code units including the terminator
//! offset: u32       # always 0
//! actual_count: u32 # code units including the terminator
//! units[actual_count]
//! ```
//!
//! Values never hold the terminator; it is added on encode and stripped on
//! decode. Fixed-length strings are zero-padded to their declared length.

use crate::context::{Marshaller, Unmarshaller};
use crate::error::{NdrError, Result};
use crate::schema::{ArrayKind, CharWidth, StringType};
use bytes::Buf;

impl<'v> Marshaller<'v> {
    pub(crate) fn encode_string(&mut self, st: &StringType, s: &str, hoisted: bool) -> Result<()> {
        st.check_fixed_len(s)?;
        let count = st.wire_count(s);
        self.encode_size_header(st.kind, count, hoisted)?;
        if count == 0 {
            return Ok(());
        }

        self.writer.align(st.element_align());
        let content = st.content_units(s);
        match st.width {
            CharWidth::Narrow => self.writer.put_slice(s.as_bytes()),
            CharWidth::Wide => {
                for unit in s.encode_utf16() {
                    self.writer.put_u16(unit);
                }
            }
        }
        // Terminator and fixed-length padding
        for _ in content..count {
            match st.width {
                CharWidth::Narrow => self.writer.put_u8(0),
                CharWidth::Wide => self.writer.put_u16(0),
            }
        }
        Ok(())
    }
}

impl<'s, B: Buf> Unmarshaller<'s, B> {
    pub(crate) fn decode_string(&mut self, st: &StringType, hoisted: Option<u32>) -> Result<String> {
        let count = self.decode_size_header(st.kind, hoisted)?;
        self.check_count(count, st.width.bytes())?;
        if count == 0 {
            return Ok(String::new());
        }

        self.reader.align(st.element_align())?;
        match st.width {
            CharWidth::Narrow => {
                let mut bytes = self.reader.get_bytes(count)?;
                let len = content_len(st, &bytes, |&b| b == 0)?;
                bytes.truncate(len);
                Ok(String::from_utf8(bytes)?)
            }
            CharWidth::Wide => {
                let mut units = Vec::with_capacity(count);
                for _ in 0..count {
                    units.push(self.reader.get_u16()?);
                }
                let len = content_len(st, &units, |&u| u == 0)?;
                let decoded: std::result::Result<String, _> =
                    char::decode_utf16(units[..len].iter().copied()).collect();
                Ok(decoded?)
            }
        }
    }
}

/// Number of leading code units that belong to the value
fn content_len<T>(st: &StringType, units: &[T], is_nul: impl Fn(&T) -> bool) -> Result<usize> {
    Ok(match (st.kind, st.null_terminated) {
        // Terminated fixed strings end at the first NUL
        (ArrayKind::Fixed(_), true) => units.iter().position(&is_nul).unwrap_or(units.len()),
        // Unterminated fixed strings drop their zero padding
        (ArrayKind::Fixed(_), false) => units.iter().rposition(|u| !is_nul(u)).map_or(0, |i| i + 1),
        (_, true) => match units.last() {
            Some(last) if is_nul(last) => units.len() - 1,
            _ => return Err(NdrError::InvalidString("missing null terminator".to_string())),
        },
        (_, false) => units.len(),
    })
}

#[cfg(test)]
mod tests {
    use crate::context::{decode, encode};
    use crate::error::NdrError;
    use crate::schema::{ArrayKind, CharWidth, NdrType};
    use crate::value::NdrValue;

    #[test]
    fn test_wide_string_counts_include_terminator() {
        let ty = NdrType::wstring();
        let value = NdrValue::from("Hi");
        let bytes = encode(&ty, &value).unwrap();
        assert_eq!(
            &bytes[..],
            &[
                3, 0, 0, 0, // max_count
                0, 0, 0, 0, // offset
                3, 0, 0, 0, // actual_count
                b'H', 0, b'i', 0, 0, 0,
            ]
        );
        let (decoded, used) = decode(&ty, &bytes).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(used, 18);
    }

    #[test]
    fn test_narrow_string_is_utf8() {
        let ty = NdrType::cstring();
        let value = NdrValue::from("é");
        let bytes = encode(&ty, &value).unwrap();
        assert_eq!(&bytes[..], &[3, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, 0xC3, 0xA9, 0]);
        assert_eq!(decode(&ty, &bytes).unwrap().0, value);
    }

    #[test]
    fn test_empty_null_terminated_string() {
        let ty = NdrType::wstring();
        let value = NdrValue::from("");
        let bytes = encode(&ty, &value).unwrap();
        assert_eq!(&bytes[..], &[1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0]);
        assert_eq!(decode(&ty, &bytes).unwrap().0, value);
    }

    #[test]
    fn test_unterminated_conformant_string() {
        let ty = NdrType::string(ArrayKind::Conformant, CharWidth::Narrow, false);
        let value = NdrValue::from("ab");
        let bytes = encode(&ty, &value).unwrap();
        assert_eq!(&bytes[..], &[2, 0, 0, 0, b'a', b'b']);
        assert_eq!(decode(&ty, &bytes).unwrap().0, value);

        let empty = NdrValue::from("");
        assert_eq!(&encode(&ty, &empty).unwrap()[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_fixed_string_padding_and_truncation() {
        let ty = NdrType::string(ArrayKind::Fixed(6), CharWidth::Wide, true);
        let value = NdrValue::from("abc");
        let bytes = encode(&ty, &value).unwrap();
        assert_eq!(&bytes[..], &[b'a', 0, b'b', 0, b'c', 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(decode(&ty, &bytes).unwrap(), (value, 12));

        let garbage_after_nul = [b'x', 0, 0, 0, b'y', 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(decode(&ty, &garbage_after_nul).unwrap().0, NdrValue::from("x"));
    }

    #[test]
    fn test_fixed_string_too_long() {
        let ty = NdrType::string(ArrayKind::Fixed(3), CharWidth::Narrow, true);
        let err = encode(&ty, &NdrValue::from("abc")).unwrap_err();
        assert!(matches!(err, NdrError::FixedLengthExceeded { limit: 3, got: 4 }));
    }

    #[test]
    fn test_unterminated_fixed_string_rejects_trailing_nul() {
        let ty = NdrType::string(ArrayKind::Fixed(4), CharWidth::Narrow, false);
        assert!(matches!(
            ty.coerce(NdrValue::from("a\0")),
            Err(NdrError::InvalidString(_))
        ));
        assert!(matches!(
            encode(&ty, &NdrValue::from("a\0")),
            Err(NdrError::InvalidString(_))
        ));

        let bytes = encode(&ty, &NdrValue::from("ab")).unwrap();
        assert_eq!(&bytes[..], b"ab\0\0");
        assert_eq!(decode(&ty, &bytes).unwrap().0, NdrValue::from("ab"));
    }

    #[test]
    fn test_invalid_utf16_rejected() {
        let ty = NdrType::wstring();
        let bytes = [2, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0x00, 0xD8, 0, 0];
        assert!(matches!(decode(&ty, &bytes), Err(NdrError::Utf16Error(_))));
    }

    #[test]
    fn test_missing_terminator_rejected() {
        let ty = NdrType::cstring();
        let bytes = [2, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, b'a', b'b'];
        assert!(matches!(decode(&ty, &bytes), Err(NdrError::InvalidString(_))));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let ty = NdrType::cstring();
        let bytes = [2, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0xFF, 0];
        assert!(matches!(decode(&ty, &bytes), Err(NdrError::Utf8Error(_))));
    }
}
