//! Full pointer aliasing
//!
//! Two `[ptr]` fields of one structure may share a referent. The shared
//! referent ID is written by every alias and the body exactly once.

use rpc_ndr::{decode_struct, encode_struct, NdrError, NdrType, NdrValue, PointerValue, StructBuilder};

fn shared() -> std::sync::Arc<rpc_ndr::StructDef> {
    StructBuilder::new("Shared")
        .field("target", NdrType::pointer(NdrType::uint32()))
        .field("first", NdrType::pointer(NdrType::uint32()))
        .field("second", NdrType::pointer(NdrType::uint32()))
        .build()
        .unwrap()
}

#[test]
fn test_aliases_share_ref_id_and_body() {
    let def = shared();
    let mut value = def.new_value();
    value.set("target", 7u32).unwrap();
    value.set_alias("first", "target").unwrap();
    value.set_alias("second", "first").unwrap();

    let bytes = encode_struct(&value).unwrap();
    assert_eq!(
        &bytes[..],
        &[
            0x00, 0x00, 0x02, 0x00, // target
            0x00, 0x00, 0x02, 0x00, // first
            0x00, 0x00, 0x02, 0x00, // second
            0x07, 0x00, 0x00, 0x00, // body, once
        ]
    );

    let (decoded, _) = decode_struct(&def, &bytes).unwrap();
    assert_eq!(decoded.get("first").unwrap(), &NdrValue::Pointer(PointerValue::Alias(0)));
    assert_eq!(decoded.get("second").unwrap(), &NdrValue::Pointer(PointerValue::Alias(0)));
    assert_eq!(decoded, value);
}

#[test]
fn test_alias_follows_later_assignment() {
    let def = shared();
    let mut value = def.new_value();
    value.set("target", 1u32).unwrap();
    value.set_alias("first", "target").unwrap();
    value.set("target", 2u32).unwrap();
    value.set("second", 3u32).unwrap();

    let bytes = encode_struct(&value).unwrap();
    assert_eq!(
        &bytes[..],
        &[
            0x00, 0x00, 0x02, 0x00, // target
            0x00, 0x00, 0x02, 0x00, // first, alias
            0x01, 0x00, 0x02, 0x00, // second, new referent
            0x02, 0x00, 0x00, 0x00, //
            0x03, 0x00, 0x00, 0x00,
        ]
    );
}

#[test]
fn test_alias_set_before_target_is_assigned() {
    let def = shared();
    let mut value = def.new_value();
    value.set_alias("first", "target").unwrap();
    value.set("target", 7u32).unwrap();

    let bytes = encode_struct(&value).unwrap();
    assert_eq!(
        &bytes[..],
        &[
            0x00, 0x00, 0x02, 0x00, // target
            0x00, 0x00, 0x02, 0x00, // first
            0x00, 0x00, 0x00, 0x00, // second
            0x07, 0x00, 0x00, 0x00,
        ]
    );
    let (decoded, _) = decode_struct(&def, &bytes).unwrap();
    assert_eq!(decoded, value);
}

#[test]
fn test_alias_of_target_made_null_encodes_null() {
    let def = shared();
    let mut value = def.new_value();
    value.set("target", 1u32).unwrap();
    value.set_alias("first", "target").unwrap();
    value.set_null("target").unwrap();

    let bytes = encode_struct(&value).unwrap();
    assert_eq!(&bytes[..], &[0u8; 12]);
}

#[test]
fn test_alias_declared_before_target_rejected() {
    let def = shared();
    let mut value = def.new_value();
    value.set("second", 4u32).unwrap();
    let err = value.set_alias("first", "second").unwrap_err();
    assert!(matches!(err, NdrError::AliasForwardReference { .. }));
}

#[test]
fn test_unique_pointers_cannot_alias() {
    let def = StructBuilder::new("Unique")
        .field("a", NdrType::unique_pointer(NdrType::uint32()))
        .field("b", NdrType::unique_pointer(NdrType::uint32()))
        .build()
        .unwrap();
    let mut value = def.new_value();
    value.set("a", 1u32).unwrap();
    assert!(matches!(
        value.set_alias("b", "a"),
        Err(NdrError::AliasNotAllowed(_))
    ));
}

#[test]
fn test_alias_value_on_raw_pointer_rejected() {
    let ty = NdrType::pointer(NdrType::uint32());
    let value = NdrValue::Pointer(PointerValue::Alias(0));
    assert!(matches!(
        rpc_ndr::encode(&ty, &value),
        Err(NdrError::AliasOutsideStruct)
    ));
}

#[test]
fn test_repeated_ref_id_across_structures_decodes_as_copy() {
    let inner = StructBuilder::new("Inner")
        .field("b", NdrType::pointer(NdrType::uint32()))
        .build()
        .unwrap();
    let outer = StructBuilder::new("Outer")
        .field("a", NdrType::pointer(NdrType::uint32()))
        .field("inner", NdrType::Struct(inner))
        .build()
        .unwrap();
    let bytes = [
        0x00, 0x00, 0x02, 0x00, // a
        0x00, 0x00, 0x02, 0x00, // inner.b, same referent
        0x05, 0x00, 0x00, 0x00,
    ];

    let (decoded, used) = decode_struct(&outer, &bytes).unwrap();
    assert_eq!(used, 12);
    assert_eq!(decoded.get("a").unwrap().referent(), Some(&NdrValue::from(5u32)));
    let inner = decoded.get("inner").unwrap().as_struct().unwrap();
    assert_eq!(inner.get("b").unwrap().referent(), Some(&NdrValue::from(5u32)));
}

#[test]
fn test_repeated_ref_id_after_body_decodes_as_copy() {
    let ty = NdrType::pointer(NdrType::uint16());
    let bytes = [
        0x00, 0x00, 0x02, 0x00, 0x09, 0x00, 0x00, 0x00, // first parameter and body
        0x00, 0x00, 0x02, 0x00, // second parameter repeats the ID
    ];
    let mut u = rpc_ndr::Unmarshaller::new(&bytes[..]);
    assert_eq!(u.pull(&ty).unwrap(), NdrValue::pointer_to(9u16));
    assert_eq!(u.pull(&ty).unwrap(), NdrValue::pointer_to(9u16));
    assert_eq!(u.remaining(), 0);
}

#[test]
fn test_repeated_ref_id_with_other_pointee_rejected() {
    let def = StructBuilder::new("Mixed")
        .field("a", NdrType::pointer(NdrType::uint32()))
        .field("b", NdrType::pointer(NdrType::uint16()))
        .build()
        .unwrap();
    let bytes = [
        0x00, 0x00, 0x02, 0x00, // a
        0x00, 0x00, 0x02, 0x00, // b claims the same referent
        0x05, 0x00, 0x00, 0x00,
    ];

    let err = decode_struct(&def, &bytes).unwrap_err();
    assert!(matches!(err, NdrError::Field { ref field, .. } if field == "b"));
    assert!(matches!(err.root(), NdrError::TypeMismatch { .. }));
}
