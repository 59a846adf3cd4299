//! Property tests for the bit accessor
//!
//! - Big-endian integer fields round-trip at any offset and width
//! - Writing a field never disturbs bits outside it
//! - Little-endian byte-aligned and bitfield round trips

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use proptest::prelude::*;
use stellar_packets::accessor::{self, little_endian_lower_byte};
use stellar_packets::{DataType, Endianness, Overflow, Value};

const BUFFER_LEN: usize = 16;

fn bit_is_set(buffer: &[u8], bit: usize) -> bool {
    buffer[bit / 8] & (0x80 >> (bit % 8)) != 0
}

fn max_for(bits: i64) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

proptest! {
    #[test]
    fn prop_big_endian_uint_round_trip(
        bit_offset in 0i64..64,
        bit_size in 1i64..=64,
        seed in any::<u64>(),
        fill in any::<u8>(),
    ) {
        let value = seed & max_for(bit_size);
        let mut buffer = vec![fill; BUFFER_LEN];
        accessor::write(
            &Value::UInt(value),
            bit_offset,
            bit_size,
            DataType::Uint,
            &mut buffer,
            Endianness::BigEndian,
            Overflow::Error,
        )
        .unwrap();
        let read = accessor::read(bit_offset, bit_size, DataType::Uint, &buffer, Endianness::BigEndian).unwrap();
        prop_assert_eq!(read, Value::UInt(value));
    }

    #[test]
    fn prop_big_endian_write_leaves_other_bits(
        bit_offset in 0i64..64,
        bit_size in 1i64..=32,
        seed in any::<u64>(),
        original in proptest::collection::vec(any::<u8>(), BUFFER_LEN),
    ) {
        let value = seed & max_for(bit_size);
        let mut buffer = original.clone();
        accessor::write(
            &Value::UInt(value),
            bit_offset,
            bit_size,
            DataType::Uint,
            &mut buffer,
            Endianness::BigEndian,
            Overflow::Error,
        )
        .unwrap();
        let field = (bit_offset as usize)..((bit_offset + bit_size) as usize);
        for bit in 0..BUFFER_LEN * 8 {
            if !field.contains(&bit) {
                prop_assert_eq!(bit_is_set(&buffer, bit), bit_is_set(&original, bit), "bit {} changed", bit);
            }
        }
    }

    #[test]
    fn prop_signed_round_trip(
        bit_offset in 0i64..64,
        bit_size in 2i64..=64,
        seed in any::<i64>(),
    ) {
        let half = if bit_size >= 64 { i64::MAX } else { (1i64 << (bit_size - 1)) - 1 };
        let value = seed.clamp(-half - 1, half);
        let mut buffer = vec![0u8; BUFFER_LEN];
        accessor::write(
            &Value::Int(value),
            bit_offset,
            bit_size,
            DataType::Int,
            &mut buffer,
            Endianness::BigEndian,
            Overflow::Error,
        )
        .unwrap();
        let read = accessor::read(bit_offset, bit_size, DataType::Int, &buffer, Endianness::BigEndian).unwrap();
        prop_assert_eq!(read, Value::Int(value));
    }

    #[test]
    fn prop_little_endian_aligned_round_trip(
        byte in 0i64..8,
        width in prop::sample::select(vec![8i64, 16, 32, 64]),
        seed in any::<u64>(),
    ) {
        let value = seed & max_for(width);
        let mut buffer = vec![0u8; BUFFER_LEN];
        accessor::write(
            &Value::UInt(value),
            byte * 8,
            width,
            DataType::Uint,
            &mut buffer,
            Endianness::LittleEndian,
            Overflow::Error,
        )
        .unwrap();
        let start = (byte * 8 / 8) as usize;
        let width_bytes = (width / 8) as usize;
        let mut expected = value.to_le_bytes().to_vec();
        expected.truncate(width_bytes);
        prop_assert_eq!(&buffer[start..start + width_bytes], expected.as_slice());
        let read = accessor::read(byte * 8, width, DataType::Uint, &buffer, Endianness::LittleEndian).unwrap();
        prop_assert_eq!(read, Value::UInt(value));
    }

    #[test]
    fn prop_little_endian_bitfield_round_trip(
        bit_offset in 8i64..120,
        bit_size in 1i64..=24,
        seed in any::<u64>(),
    ) {
        prop_assume!(bit_offset % 8 != 0 || !matches!(bit_size, 8 | 16));
        prop_assume!(little_endian_lower_byte(bit_offset, bit_size) >= 0);
        let value = seed & max_for(bit_size);
        let mut buffer = vec![0xA5u8; BUFFER_LEN];
        accessor::write(
            &Value::UInt(value),
            bit_offset,
            bit_size,
            DataType::Uint,
            &mut buffer,
            Endianness::LittleEndian,
            Overflow::Error,
        )
        .unwrap();
        let read = accessor::read(bit_offset, bit_size, DataType::Uint, &buffer, Endianness::LittleEndian).unwrap();
        prop_assert_eq!(read, Value::UInt(value));
    }

    #[test]
    fn prop_truncate_keeps_low_bits(
        bit_size in 1i64..=32,
        seed in any::<u64>(),
    ) {
        let mut buffer = vec![0u8; BUFFER_LEN];
        let written = accessor::write(
            &Value::UInt(seed >> 16),
            0,
            bit_size,
            DataType::Uint,
            &mut buffer,
            Endianness::BigEndian,
            Overflow::Truncate,
        )
        .unwrap();
        prop_assert_eq!(written, Value::UInt((seed >> 16) & max_for(bit_size)));
    }
}
