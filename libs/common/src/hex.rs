//! Hex rendering for packet buffers and raw logs

use std::fmt::Write;

const BYTES_PER_LINE: usize = 16;

/// Encode bytes to uppercase hex string
/// Example: [0x12, 0x34, 0xAB] -> "1234AB"
pub fn encode_upper(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 2);
    for byte in data {
        // Writing to String buffer is infallible - no need for expect
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}

/// Multi-line dump: offset, 16 space-separated bytes, printable ASCII
///
/// ```text
/// 00000000: 48 45 4C 4C 4F                                   HELLO
/// ```
pub fn hex_dump(data: &[u8], indent: usize) -> String {
    let pad = " ".repeat(indent);
    let mut out = String::new();
    for (line, chunk) in data.chunks(BYTES_PER_LINE).enumerate() {
        let _ = write!(&mut out, "{}{:08X}:", pad, line * BYTES_PER_LINE);
        for byte in chunk {
            let _ = write!(&mut out, " {:02X}", byte);
        }
        for _ in chunk.len()..BYTES_PER_LINE {
            out.push_str("   ");
        }
        out.push_str("  ");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }
    out
}
