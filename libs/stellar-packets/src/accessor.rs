//! Bit accessor - typed reads and writes at arbitrary bit positions
//!
//! Offsets are in bits. A negative `bit_offset` addresses from the end of the
//! buffer. STRING and BLOCK accept a zero or negative `bit_size` meaning "the
//! rest of the buffer minus |bit_size| bits".
//!
//! ```text
//!  BIG_ENDIAN bitfield (offset 12, size 12)     LITTLE_ENDIAN bitfield (offset 12, size 12)
//!  byte:  0        1        2                   byte:  0        1
//!        [........|....XXXX|XXXXXXXX]                 [XXXXXXXX|XXXX....]
//!                      ^ offset = MSB                       ^ offset = MSB, inside the last byte
//! ```
//!
//! Little-endian bitfields take the bytes ending at `bit_offset / 8`, reverse
//! them, then extract exactly like a big-endian field.

use crate::error::{PacketError, Result};
use crate::types::{DataType, Endianness, Overflow};
use crate::value::Value;

/// Maximum integer width supported by `Value`
pub const MAX_INTEGER_BITS: i64 = 64;

// ============================================================================
// Helpers
// ============================================================================

/// True when an INT/UINT item must be addressed as a little-endian bit field
pub fn is_little_endian_bitfield(
    bit_offset: i64,
    bit_size: i64,
    data_type: DataType,
    endianness: Endianness,
) -> bool {
    endianness == Endianness::LittleEndian
        && data_type.is_integer()
        && !(bit_offset.rem_euclid(8) == 0 && matches!(bit_size, 8 | 16 | 32 | 64))
}

/// First byte touched by a little-endian bitfield (may be negative when ill-formed)
pub fn little_endian_lower_byte(bit_offset: i64, bit_size: i64) -> i64 {
    let num_bytes = ((bit_offset.rem_euclid(8) + bit_size - 1) / 8) + 1;
    bit_offset.div_euclid(8) - num_bytes + 1
}

/// (min, max, hex_max) for an integer of the given width
pub fn integer_limits(bit_size: i64, data_type: DataType) -> (i128, i128, i128) {
    let bits = bit_size.clamp(1, MAX_INTEGER_BITS) as u32;
    let hex_max = (1i128 << bits) - 1;
    match data_type {
        DataType::Int => {
            let max = (1i128 << (bits - 1)) - 1;
            (-(max + 1), max, hex_max)
        },
        _ => (0, hex_max, hex_max),
    }
}

fn insufficient(
    op: &'static str,
    length: usize,
    data_type: DataType,
    bit_offset: i64,
    bit_size: i64,
) -> PacketError {
    PacketError::BufferInsufficient {
        op,
        length,
        data_type: data_type.to_string(),
        bit_offset,
        bit_size,
    }
}

fn mask(size: usize) -> u128 {
    if size >= 128 {
        u128::MAX
    } else {
        (1u128 << size) - 1
    }
}

/// Validate a scalar access and return the normalized (non-negative) bit offset
fn normalize(
    op: &'static str,
    bit_offset: i64,
    bit_size: i64,
    data_type: DataType,
    length: usize,
) -> Result<i64> {
    if data_type == DataType::Derived {
        return Err(PacketError::UnknownDataType(data_type.to_string()));
    }
    if bit_size <= 0 && !data_type.is_bytes() {
        return Err(PacketError::Access(format!(
            "bit_size {} must be positive for data types other than STRING and BLOCK",
            bit_size
        )));
    }

    let mut offset = bit_offset;
    if offset < 0 {
        if bit_size <= 0 {
            return Err(PacketError::Access(format!(
                "negative or zero bit_sizes ({}) cannot be given with negative bit_offsets ({})",
                bit_size, bit_offset
            )));
        }
        offset += length as i64 * 8;
        if offset < 0 {
            return Err(insufficient(op, length, data_type, bit_offset, bit_size));
        }
    }

    check_type_constraints(bit_offset, offset, bit_size, data_type)?;
    Ok(offset)
}

fn check_type_constraints(
    given_offset: i64,
    offset: i64,
    bit_size: i64,
    data_type: DataType,
) -> Result<()> {
    match data_type {
        DataType::Float | DataType::String | DataType::Block if offset % 8 != 0 => {
            Err(PacketError::Access(format!(
                "bit_offset {} is not byte aligned for data_type {}",
                given_offset, data_type
            )))
        },
        DataType::Float if bit_size != 32 && bit_size != 64 => Err(PacketError::Access(format!(
            "bit_size is {} but must be 32 or 64 for data_type FLOAT",
            bit_size
        ))),
        DataType::String | DataType::Block if bit_size % 8 != 0 => {
            Err(PacketError::Access(format!(
                "bit_size {} is not a multiple of 8 for data_type {}",
                bit_size, data_type
            )))
        },
        DataType::Int | DataType::Uint if bit_size > MAX_INTEGER_BITS => {
            Err(PacketError::Access(format!(
                "bit_size {} exceeds {} bits for data_type {}",
                bit_size, MAX_INTEGER_BITS, data_type
            )))
        },
        _ => Ok(()),
    }
}

/// Bounds check for a resolved (offset, size) pair
fn check_bounds(
    op: &'static str,
    offset: i64,
    size: i64,
    data_type: DataType,
    endianness: Endianness,
    length: usize,
    given: (i64, i64),
) -> Result<()> {
    let upper_byte = if is_little_endian_bitfield(offset, size, data_type, endianness) {
        if little_endian_lower_byte(offset, size) < 0 {
            return Err(PacketError::Access(format!(
                "LITTLE_ENDIAN bitfield with bit_offset {} and bit_size {} is invalid",
                given.0, given.1
            )));
        }
        offset / 8
    } else {
        (offset + size - 1) / 8
    };
    if upper_byte >= length as i64 {
        return Err(insufficient(op, length, data_type, given.0, given.1));
    }
    Ok(())
}

/// Byte range and bit alignment used for integer extraction
///
/// Returns (lower_byte, upper_byte, reversed, start_bits).
fn integer_region(
    offset: usize,
    size: usize,
    data_type: DataType,
    endianness: Endianness,
) -> (usize, usize, bool, usize) {
    match endianness {
        Endianness::BigEndian => (offset / 8, (offset + size - 1) / 8, false, offset % 8),
        Endianness::LittleEndian => {
            if is_little_endian_bitfield(offset as i64, size as i64, data_type, endianness) {
                let num_bytes = ((offset % 8) + size - 1) / 8 + 1;
                let upper = offset / 8;
                (upper + 1 - num_bytes, upper, true, offset % 8)
            } else {
                (offset / 8, offset / 8 + size / 8 - 1, true, 0)
            }
        },
    }
}

fn region_bytes(buffer: &[u8], lower: usize, upper: usize, reversed: bool) -> Vec<u8> {
    let mut bytes = buffer[lower..=upper].to_vec();
    if reversed {
        bytes.reverse();
    }
    bytes
}

fn extract_integer(buffer: &[u8], offset: usize, size: usize, data_type: DataType, endianness: Endianness) -> Value {
    let (lower, upper, reversed, start_bits) = integer_region(offset, size, data_type, endianness);
    let bytes = region_bytes(buffer, lower, upper, reversed);
    let acc = bytes.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b));
    let shift = bytes.len() * 8 - start_bits - size;
    let raw = ((acc >> shift) & mask(size)) as u64;
    interpret_integer(raw, size, data_type)
}

fn interpret_integer(raw: u64, size: usize, data_type: DataType) -> Value {
    match data_type {
        DataType::Int => {
            let negative = size < 64 && (raw >> (size - 1)) & 1 == 1;
            if negative {
                Value::Int((raw | (u64::MAX << size)) as i64)
            } else {
                Value::Int(raw as i64)
            }
        },
        _ => Value::UInt(raw),
    }
}

fn insert_integer(
    buffer: &mut [u8],
    bits: u128,
    offset: usize,
    size: usize,
    data_type: DataType,
    endianness: Endianness,
) {
    let (lower, upper, reversed, start_bits) = integer_region(offset, size, data_type, endianness);
    let mut bytes = region_bytes(buffer, lower, upper, reversed);
    let total = bytes.len() * 8;
    let shift = total - start_bits - size;
    let mut acc = bytes.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b));
    let field_mask = mask(size) << shift;
    acc = (acc & !field_mask) | ((bits & mask(size)) << shift);

    let n = bytes.len();
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = (acc >> (8 * (n - 1 - i))) as u8;
    }
    if reversed {
        bytes.reverse();
    }
    buffer[lower..=upper].copy_from_slice(&bytes);
}

/// Apply the overflow policy to an integer value
pub fn check_overflow(
    value: i128,
    bit_size: i64,
    data_type: DataType,
    overflow: Overflow,
) -> Result<i128> {
    if overflow == Overflow::Truncate {
        return Ok(value);
    }
    let (min, max, hex_max) = integer_limits(bit_size, data_type);
    let overflow_error = || PacketError::Overflow {
        value: value.to_string(),
        bit_size,
        data_type: data_type.to_string(),
    };
    if value > max {
        match overflow {
            Overflow::Saturate => Ok(max),
            Overflow::ErrorAllowHex if value <= hex_max => Ok(value),
            _ => Err(overflow_error()),
        }
    } else if value < min {
        match overflow {
            Overflow::Saturate => Ok(min),
            _ => Err(overflow_error()),
        }
    } else {
        Ok(value)
    }
}

fn bytes_for_write(value: &Value, data_type: DataType) -> Result<Vec<u8>> {
    match (value, data_type) {
        (Value::String(s), _) => Ok(s.as_bytes().to_vec()),
        (Value::Block(b), _) => Ok(b.clone()),
        (Value::Null, _) => Ok(Vec::new()),
        (other, DataType::String) => Ok(other.to_string().into_bytes()),
        (other, _) => Err(PacketError::Access(format!(
            "value {} is not valid for data_type {}",
            other, data_type
        ))),
    }
}

// ============================================================================
// Scalar access
// ============================================================================

/// Read one value from the buffer
pub fn read(
    bit_offset: i64,
    bit_size: i64,
    data_type: DataType,
    buffer: &[u8],
    endianness: Endianness,
) -> Result<Value> {
    let length = buffer.len();
    let offset = normalize("read", bit_offset, bit_size, data_type, length)?;

    let size = if bit_size <= 0 {
        let size = length as i64 * 8 - offset + bit_size;
        if size == 0 {
            return Ok(match data_type {
                DataType::Block => Value::Block(Vec::new()),
                _ => Value::String(String::new()),
            });
        }
        if size < 0 {
            return Err(insufficient("read", length, data_type, bit_offset, bit_size));
        }
        size
    } else {
        bit_size
    };

    check_bounds(
        "read",
        offset,
        size,
        data_type,
        endianness,
        length,
        (bit_offset, bit_size),
    )?;

    let (offset, size) = (offset as usize, size as usize);
    let first = offset / 8;
    match data_type {
        DataType::String => {
            let bytes = &buffer[first..first + size / 8];
            let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
            Ok(Value::String(
                String::from_utf8_lossy(&bytes[..end]).into_owned(),
            ))
        },
        DataType::Block => Ok(Value::Block(buffer[first..first + size / 8].to_vec())),
        DataType::Float => {
            let bytes = &buffer[first..first + size / 8];
            let value = if size == 32 {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(bytes);
                f64::from(match endianness {
                    Endianness::BigEndian => f32::from_be_bytes(raw),
                    Endianness::LittleEndian => f32::from_le_bytes(raw),
                })
            } else {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                match endianness {
                    Endianness::BigEndian => f64::from_be_bytes(raw),
                    Endianness::LittleEndian => f64::from_le_bytes(raw),
                }
            };
            Ok(Value::Float(value))
        },
        DataType::Int | DataType::Uint => {
            Ok(extract_integer(buffer, offset, size, data_type, endianness))
        },
        DataType::Derived => Err(PacketError::UnknownDataType(data_type.to_string())),
    }
}

/// Write one value into the buffer
///
/// Returns the value as it now reads back (after overflow handling). Variable
/// sized STRING/BLOCK writes resize the buffer while keeping its trailing bytes.
pub fn write(
    value: &Value,
    bit_offset: i64,
    bit_size: i64,
    data_type: DataType,
    buffer: &mut Vec<u8>,
    endianness: Endianness,
    overflow: Overflow,
) -> Result<Value> {
    let length = buffer.len();
    let offset = normalize("write", bit_offset, bit_size, data_type, length)?;

    if data_type.is_bytes() && bit_size <= 0 {
        let bytes = bytes_for_write(value, data_type)?;
        let first = (offset / 8) as usize;
        if first > length {
            return Err(insufficient("write", length, data_type, bit_offset, bit_size));
        }
        let trailing = (-bit_size / 8) as usize;
        let end = length.saturating_sub(trailing).max(first);
        let mut resized = Vec::with_capacity(first + bytes.len() + (length - end));
        resized.extend_from_slice(&buffer[..first]);
        resized.extend_from_slice(&bytes);
        resized.extend_from_slice(&buffer[end..]);
        *buffer = resized;
        return Ok(value.clone());
    }

    check_bounds(
        "write",
        offset,
        bit_size,
        data_type,
        endianness,
        length,
        (bit_offset, bit_size),
    )?;

    let (offset, size) = (offset as usize, bit_size as usize);
    let first = offset / 8;
    match data_type {
        DataType::String | DataType::Block => {
            let mut bytes = bytes_for_write(value, data_type)?;
            let byte_size = size / 8;
            if bytes.len() > byte_size {
                if overflow == Overflow::Truncate {
                    bytes.truncate(byte_size);
                } else {
                    return Err(PacketError::Access(format!(
                        "value of {} bytes does not fit into {} bytes for data_type {}",
                        bytes.len(),
                        byte_size,
                        data_type
                    )));
                }
            }
            let written = bytes.clone();
            bytes.resize(byte_size, 0);
            buffer[first..first + byte_size].copy_from_slice(&bytes);
            Ok(match data_type {
                DataType::Block => Value::Block(written),
                _ => Value::String(String::from_utf8_lossy(&written).into_owned()),
            })
        },
        DataType::Float => {
            let v = value.as_f64().ok_or_else(|| {
                PacketError::Access(format!("value {} is not valid for data_type FLOAT", value))
            })?;
            if size == 32 {
                let raw = match endianness {
                    Endianness::BigEndian => (v as f32).to_be_bytes(),
                    Endianness::LittleEndian => (v as f32).to_le_bytes(),
                };
                buffer[first..first + 4].copy_from_slice(&raw);
                Ok(Value::Float(f64::from(v as f32)))
            } else {
                let raw = match endianness {
                    Endianness::BigEndian => v.to_be_bytes(),
                    Endianness::LittleEndian => v.to_le_bytes(),
                };
                buffer[first..first + 8].copy_from_slice(&raw);
                Ok(Value::Float(v))
            }
        },
        DataType::Int | DataType::Uint => {
            let v = value.as_i128().ok_or_else(|| {
                PacketError::Access(format!(
                    "value {} is not valid for data_type {}",
                    value, data_type
                ))
            })?;
            let v = check_overflow(v, bit_size, data_type, overflow)?;
            let bits = (v as u128) & mask(size);
            insert_integer(buffer, bits, offset, size, data_type, endianness);
            Ok(interpret_integer(bits as u64, size, data_type))
        },
        DataType::Derived => Err(PacketError::UnknownDataType(data_type.to_string())),
    }
}

// ============================================================================
// Array access
// ============================================================================

fn check_array_item(
    op: &'static str,
    bit_offset: i64,
    bit_size: i64,
    data_type: DataType,
    array_size: i64,
    endianness: Endianness,
) -> Result<()> {
    if data_type == DataType::Derived {
        return Err(PacketError::UnknownDataType(data_type.to_string()));
    }
    if bit_size <= 0 {
        return Err(PacketError::Access(format!(
            "bit_size {} must be positive for arrays",
            bit_size
        )));
    }
    if array_size != 0 && array_size % bit_size != 0 {
        return Err(PacketError::Access(format!(
            "array_size {} not a multiple of bit_size {}",
            array_size, bit_size
        )));
    }
    if bit_offset < 0 && array_size <= 0 {
        return Err(PacketError::Access(format!(
            "negative or zero array_size ({}) cannot be given with negative bit_offset ({})",
            array_size, bit_offset
        )));
    }
    check_type_constraints(bit_offset, bit_offset.rem_euclid(8), bit_size, data_type)?;
    if bit_size > 1 && is_little_endian_bitfield(bit_offset, bit_size, data_type, endianness) {
        return Err(PacketError::Access(format!(
            "{} does not support little endian bit fields with bit_size greater than 1-bit",
            op
        )));
    }
    Ok(())
}

/// Read every element of an array item
pub fn read_array(
    bit_offset: i64,
    bit_size: i64,
    data_type: DataType,
    array_size: i64,
    buffer: &[u8],
    endianness: Endianness,
) -> Result<Vec<Value>> {
    check_array_item("read_array", bit_offset, bit_size, data_type, array_size, endianness)?;
    let length = buffer.len();
    let length_bits = length as i64 * 8;

    let mut offset = bit_offset;
    if offset < 0 {
        offset += length_bits;
        if offset < 0 {
            return Err(insufficient("read", length, data_type, bit_offset, bit_size));
        }
    }

    let mut size = array_size;
    if size <= 0 {
        size = length_bits - offset + array_size;
        if size == 0 {
            return Ok(Vec::new());
        }
        if size < 0 {
            return Err(insufficient("read", length, data_type, bit_offset, bit_size));
        }
    }
    if (offset + size - 1) / 8 >= length as i64 {
        return Err(insufficient("read", length, data_type, bit_offset, bit_size));
    }

    let count = size / bit_size;
    (0..count)
        .map(|index| read(offset + index * bit_size, bit_size, data_type, buffer, endianness))
        .collect()
}

/// Write all elements of an array item
///
/// Variable sized arrays (array_size <= 0) resize the buffer to fit `values`
/// while keeping the bytes that follow the array.
#[allow(clippy::too_many_arguments)]
pub fn write_array(
    values: &[Value],
    bit_offset: i64,
    bit_size: i64,
    data_type: DataType,
    array_size: i64,
    buffer: &mut Vec<u8>,
    endianness: Endianness,
    overflow: Overflow,
) -> Result<Vec<Value>> {
    check_array_item("write_array", bit_offset, bit_size, data_type, array_size, endianness)?;
    let length = buffer.len();
    let length_bits = length as i64 * 8;

    let mut offset = bit_offset;
    if offset < 0 {
        offset += length_bits;
        if offset < 0 {
            return Err(insufficient("write", length, data_type, bit_offset, bit_size));
        }
    }

    let needed_bits = values.len() as i64 * bit_size;
    if array_size > 0 {
        if needed_bits > array_size {
            return Err(PacketError::Access(format!(
                "too many values {} for given array_size {} and bit_size {}",
                values.len(),
                array_size,
                bit_size
            )));
        }
        if (offset + array_size - 1) / 8 >= length as i64 {
            return Err(insufficient("write", length, data_type, bit_offset, bit_size));
        }
    } else {
        if offset % 8 != 0 {
            return Err(PacketError::Access(format!(
                "variable sized array at bit_offset {} must be byte aligned",
                bit_offset
            )));
        }
        let first = (offset / 8) as usize;
        if first > length {
            return Err(insufficient("write", length, data_type, bit_offset, bit_size));
        }
        let end = ((length_bits + array_size) / 8).max(first as i64) as usize;
        let new_bytes = ((needed_bits + 7) / 8) as usize;
        let mut resized = Vec::with_capacity(first + new_bytes + length.saturating_sub(end));
        resized.extend_from_slice(&buffer[..first]);
        resized.resize(first + new_bytes, 0);
        resized.extend_from_slice(&buffer[end.min(length)..]);
        *buffer = resized;
    }

    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            write(
                value,
                offset + index as i64 * bit_size,
                bit_size,
                data_type,
                buffer,
                endianness,
                overflow,
            )
        })
        .collect()
}
