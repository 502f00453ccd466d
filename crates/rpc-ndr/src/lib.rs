//! NDR (Network Data Representation) marshaling engine
//!
//! This crate builds and interprets the stub data of DCE/RPC requests and
//! responses, as exchanged with remote services over SMB named pipes. Payload
//! types are described at runtime with [`NdrType`] schemas and values are
//! held in [`NdrValue`] trees.
//!
//! # NDR Wire Format
//!
//! NDR is the standard encoding for DCE RPC data. Key characteristics:
//! - Little-endian; primitives align to their natural size (1, 2, 4, or 8 bytes)
//! - Structures align to their largest member
//! - Conformant data (arrays with runtime-determined size) comes at the end,
//!   with its `max_count` hoisted to the front of the structure
//! - Pointers write a referent ID in place; the data they point to follows
//!   the enclosing top-level value
//! - Strings are conformant varying arrays with a null terminator
//!
//! # Example
//!
//! ```
//! use rpc_ndr::{encode_struct, decode_struct, NdrType, StructBuilder};
//!
//! let def = StructBuilder::new("Request")
//!     .field("flags", NdrType::uint32())
//!     .field("name", NdrType::pointer(NdrType::wstring()))
//!     .build()
//!     .unwrap();
//!
//! let request = def.new_value().with("flags", 1u32).unwrap().with("name", "svc").unwrap();
//! let bytes = encode_struct(&request).unwrap();
//!
//! let (decoded, _) = decode_struct(&def, &bytes).unwrap();
//! assert_eq!(decoded, request);
//! ```

mod align;
mod arrays;
mod composer;
mod config;
mod context;
mod decode;
mod encode;
mod error;
mod handle;
mod pointers;
mod scalar;
mod schema;
mod stream;
mod strings;
mod value;

pub use align::{align_up, pad_before, POINTER_ALIGN, SIZE_FIELD_ALIGN};
pub use composer::{layout, FieldLayout, StructLayout};
pub use config::{NdrConfig, DEFAULT_INITIAL_REF_ID, MAX_NDR_ARRAY_ELEMENTS};
pub use context::{decode, decode_struct, encode, encode_struct, encoded_len, Marshaller, Unmarshaller};
pub use decode::{from_ndr_bytes, NdrDecode};
pub use encode::{to_ndr_bytes, NdrEncode};
pub use error::{NdrError, Result};
pub use handle::{ContextHandle, NdrUuid};
pub use pointers::{ReferentArena, ReferentState};
pub use scalar::{FileTime, Scalar, ScalarKind};
pub use schema::{
    ArrayKind, ArrayType, CharWidth, Derived, FieldDef, NdrType, PointerKind, PointerType, StringType,
    StructBuilder, StructDef,
};
pub use stream::{NdrReader, NdrWriter};
pub use value::{ArrayMut, NdrValue, PointerValue, StructValue};

/// Re-export bytes for convenience
pub use bytes::{Buf, Bytes};
