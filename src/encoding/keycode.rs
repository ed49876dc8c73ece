//! Order-preserving key encoding.
//!
//! Primary keys and sort keys are built by concatenating encoded cells, so a
//! plain byte comparison of two keys orders them column by column. Every cell
//! starts with a type prefix; nulls sort first.

use crate::column::Value;

// Type prefixes for order-preserving encoding
// Order matters: these determine cross-type ordering
const TYPE_NULL: u8 = 0x00;
const TYPE_BOOLEAN: u8 = 0x01;
const TYPE_INTEGER: u8 = 0x02;
const TYPE_FLOAT: u8 = 0x03;

/// Encode a boolean with order preservation
pub fn encode_boolean(b: bool, out: &mut Vec<u8>) {
    out.extend_from_slice(&[TYPE_BOOLEAN, if b { 0x01 } else { 0x00 }]);
}

/// Encode an integer with order preservation
pub fn encode_integer(i: i64, out: &mut Vec<u8>) {
    // Flip the sign bit to ensure negative numbers sort before positive
    let unsigned = (i as u64) ^ (1u64 << 63);
    out.push(TYPE_INTEGER);
    out.extend_from_slice(&unsigned.to_be_bytes());
}

/// Encode a float with order preservation
pub fn encode_float(f: f64, out: &mut Vec<u8>) {
    let bits = f.to_bits();

    // Negative: flip all bits. Positive: set the sign bit.
    let ordered_bits = if bits & (1u64 << 63) != 0 {
        !bits
    } else {
        bits | (1u64 << 63)
    };

    out.push(TYPE_FLOAT);
    out.extend_from_slice(&ordered_bits.to_be_bytes());
}

/// Append one cell to a key.
pub fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match *value {
        Value::Null => out.push(TYPE_NULL),
        Value::Bool(b) => encode_boolean(b, out),
        Value::Int8(v) => encode_integer(v as i64, out),
        Value::Uint8(v) => encode_integer(v as i64, out),
        Value::Int16(v) => encode_integer(v as i64, out),
        Value::Uint16(v) => encode_integer(v as i64, out),
        Value::Int32(v) => encode_integer(v as i64, out),
        Value::Uint32(v) => encode_integer(v as i64, out),
        Value::Int64(v) => encode_integer(v, out),
        Value::Float32(v) => encode_float(v as f64, out),
        Value::Float64(v) => encode_float(v, out),
    }
}

/// Encode a composite key from cells in column order.
pub fn encode_key<'a>(values: impl IntoIterator<Item = &'a Value>) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    for value in values {
        encode_value(value, &mut key);
    }
    key
}
