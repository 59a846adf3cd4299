//! Packet layout and identification tests
//!
//! - Bit overlap reporting over the sorted item view
//! - Identification against short and long buffers
//! - CONVERTED derivation through conversions and states

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;
use stellar_packets::{
    DataType, Endianness, ItemState, Overflow, Packet, PolynomialConversion, Value, ValueType,
};

fn packet() -> Packet {
    Packet::new("TGT", "PKT", Endianness::BigEndian)
}

fn define(p: &mut Packet, name: &str, offset: i64, size: i64, data_type: DataType) {
    p.define_item(name, offset, size, data_type, None, None, Overflow::Error)
        .unwrap();
}

fn define_le(p: &mut Packet, name: &str, offset: i64, size: i64) {
    p.define_item(
        name,
        offset,
        size,
        DataType::Uint,
        None,
        Some(Endianness::LittleEndian),
        Overflow::Error,
    )
    .unwrap();
}

// ============================================================================
// Overlap reporting
// ============================================================================

#[test]
fn test_overlap_same_offset() {
    let mut p = packet();
    define(&mut p, "ITEM1", 0, 8, DataType::Uint);
    define(&mut p, "ITEM2", 0, 8, DataType::Uint);
    assert_eq!(
        p.check_bit_offsets(),
        vec!["Bit definition overlap at bit offset 0 for packet TGT PKT items ITEM2 and ITEM1".to_string()]
    );
}

#[test]
fn test_overlap_partial() {
    let mut p = packet();
    define(&mut p, "ITEM1", 0, 32, DataType::Uint);
    define(&mut p, "ITEM2", 16, 32, DataType::Uint);
    assert_eq!(
        p.check_bit_offsets(),
        vec!["Bit definition overlap at bit offset 16 for packet TGT PKT items ITEM2 and ITEM1".to_string()]
    );
}

#[test]
fn test_overlap_with_negative_offsets() {
    let mut p = packet();
    define(&mut p, "ITEM1", 8, -16, DataType::Block);
    define(&mut p, "ITEM2", -17, 16, DataType::Uint);
    assert_eq!(
        p.check_bit_offsets(),
        vec!["Bit definition overlap at bit offset -17 for packet TGT PKT items ITEM2 and ITEM1".to_string()]
    );

    let mut p = packet();
    define(&mut p, "ITEM1", 8, -16, DataType::Block);
    define(&mut p, "ITEM2", -16, 16, DataType::Uint);
    assert!(p.check_bit_offsets().is_empty());
}

#[test]
fn test_overlap_arrays() {
    let mut p = packet();
    p.define_item("ITEM1", 0, 8, DataType::Uint, Some(32), None, Overflow::Error).unwrap();
    p.define_item("ITEM2", 0, 8, DataType::Uint, Some(32), None, Overflow::Error).unwrap();
    assert_eq!(p.check_bit_offsets().len(), 1);

    let mut p = packet();
    p.define_item("ITEM1", 0, 8, DataType::Uint, Some(32), None, Overflow::Error).unwrap();
    p.define_item("ITEM2", 16, 8, DataType::Uint, Some(32), None, Overflow::Error).unwrap();
    assert_eq!(
        p.check_bit_offsets(),
        vec!["Bit definition overlap at bit offset 16 for packet TGT PKT items ITEM2 and ITEM1".to_string()]
    );
}

#[test]
fn test_big_endian_bitfields() {
    let mut p = packet();
    define(&mut p, "ITEM1", 0, 12, DataType::Uint);
    define(&mut p, "ITEM2", 12, 4, DataType::Uint);
    define(&mut p, "ITEM3", 16, 16, DataType::Uint);
    assert!(p.check_bit_offsets().is_empty());

    let mut p = packet();
    define(&mut p, "ITEM1", 0, 12, DataType::Uint);
    define(&mut p, "ITEM2", 10, 6, DataType::Uint);
    assert_eq!(
        p.check_bit_offsets(),
        vec!["Bit definition overlap at bit offset 10 for packet TGT PKT items ITEM2 and ITEM1".to_string()]
    );
}

#[test]
fn test_little_endian_bitfields() {
    let mut p = packet();
    define_le(&mut p, "ITEM1", 12, 12);
    define_le(&mut p, "ITEM2", 16, 16);
    assert!(p.check_bit_offsets().is_empty());

    let mut p = packet();
    define_le(&mut p, "ITEM1", 12, 12);
    define_le(&mut p, "ITEM2", 10, 10);
    assert_eq!(
        p.check_bit_offsets(),
        vec!["Bit definition overlap at bit offset 12 for packet TGT PKT items ITEM1 and ITEM2".to_string()]
    );
}

#[test]
fn test_little_endian_bitfield_from_end_of_buffer() {
    let mut p = packet();
    define_le(&mut p, "HEAD", 0, 8);
    define_le(&mut p, "TAIL", -12, 12);
    p.set_buffer(vec![0xFF; 4]);

    p.write("TAIL", &Value::UInt(0x5A5), ValueType::Raw).unwrap();
    assert_eq!(p.read("TAIL", ValueType::Raw).unwrap(), Value::UInt(0x5A5));
    assert_eq!(p.read("HEAD", ValueType::Raw).unwrap(), Value::UInt(0xFF));
    assert_eq!(p.buffer()[3], 0xFF);

    // the tail follows the buffer end
    p.set_buffer(vec![0xFF; 6]);
    p.write("TAIL", &Value::UInt(0x123), ValueType::Raw).unwrap();
    assert_eq!(p.read("TAIL", ValueType::Raw).unwrap(), Value::UInt(0x123));
    assert_eq!(p.buffer()[..3], [0xFF, 0xFF, 0xFF]);
}

// ============================================================================
// Identification
// ============================================================================

fn identified_packet() -> Packet {
    let mut p = packet();
    define(&mut p, "SYNC", 0, 8, DataType::Uint);
    define(&mut p, "APID", 8, 8, DataType::Uint);
    define(&mut p, "DATA", 16, 16, DataType::Uint);
    p.item_mut("APID").unwrap().set_id_value(Some(Value::UInt(5))).unwrap();
    p
}

#[test]
fn test_identify_ignores_length() {
    let p = identified_packet();
    assert!(p.identify(&[0xFF, 5]));
    assert!(p.identify(&[0, 5, 1, 2, 3, 4, 5, 6]));
    assert!(!p.identify(&[0, 6, 0, 0]));
}

#[test]
fn test_identify_truncated_id_fails() {
    let p = identified_packet();
    assert!(!p.identify(&[0]));
    assert!(!p.identify(&[]));
}

#[test]
fn test_no_id_items_matches_anything() {
    let mut p = packet();
    define(&mut p, "DATA", 0, 8, DataType::Uint);
    assert!(p.identify(&[1, 2, 3]));
    assert!(p.id_items().is_empty());
}

#[test]
fn test_read_id_values() {
    let p = identified_packet();
    assert_eq!(p.read_id_values(&[0, 5, 0, 0]), vec![Value::UInt(5)]);
}

// ============================================================================
// Representations
// ============================================================================

#[test]
fn test_converted_derivation_chain() {
    let mut p = packet();
    define(&mut p, "VOLTS", 0, 16, DataType::Uint);
    define(&mut p, "SWITCH", 16, 8, DataType::Uint);
    {
        let volts = p.item_mut("VOLTS").unwrap();
        volts.read_conversion = Some(Arc::new(PolynomialConversion::new(vec![1.0, 0.25]).unwrap()));
        volts.set_format_string(Some("%0.2f")).unwrap();
        volts.units = Some("V".to_string());
        let switch = p.item_mut("SWITCH").unwrap();
        switch.set_states(Some(vec![ItemState::new("OFF", 0u64), ItemState::new("ON", 1u64)]));
        switch.units = Some("-".to_string());
    }
    p.set_buffer(vec![0x00, 0x10, 0x01]);

    assert_eq!(p.read("VOLTS", ValueType::Raw).unwrap(), Value::UInt(16));
    assert_eq!(p.read("VOLTS", ValueType::Converted).unwrap(), Value::Float(5.0));
    assert_eq!(p.read("VOLTS", ValueType::Formatted).unwrap(), Value::from("5.00"));
    assert_eq!(p.read("VOLTS", ValueType::WithUnits).unwrap(), Value::from("5.00 V"));
    assert_eq!(p.read("SWITCH", ValueType::Converted).unwrap(), Value::from("ON"));
    assert_eq!(p.read("SWITCH", ValueType::WithUnits).unwrap(), Value::from("ON"));

    p.write("SWITCH", &Value::from("OFF"), ValueType::Converted).unwrap();
    assert_eq!(p.buffer()[2], 0);
}

#[test]
fn test_array_representations_are_element_wise() {
    let mut p = packet();
    p.define_item("ARR", 0, 8, DataType::Uint, Some(24), None, Overflow::Error).unwrap();
    {
        let arr = p.item_mut("ARR").unwrap();
        arr.read_conversion = Some(Arc::new(PolynomialConversion::new(vec![0.0, 2.0]).unwrap()));
        arr.units = Some("m".to_string());
    }
    p.set_buffer(vec![1, 2, 3]);
    assert_eq!(
        p.read("ARR", ValueType::Converted).unwrap(),
        Value::Array(vec![Value::Float(2.0), Value::Float(4.0), Value::Float(6.0)])
    );
    assert_eq!(
        p.read("ARR", ValueType::WithUnits).unwrap(),
        Value::Array(vec![Value::from("2.0 m"), Value::from("4.0 m"), Value::from("6.0 m")])
    );
}

#[test]
fn test_short_buffer_is_zero_extended() {
    let mut p = identified_packet();
    p.set_buffer(vec![0xAA]);
    assert_eq!(p.len(), 4);
    assert_eq!(p.read("DATA", ValueType::Raw).unwrap(), Value::UInt(0));
}
