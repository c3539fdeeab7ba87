//! XOR float codec.
//!
//! Each value after the first XORs against its predecessor. A zero XOR
//! emits a single `0` control bit. Otherwise a `1` bit is followed by a
//! mode bit: `0` reuses the previous `(leading, trailing)` zero window
//! and writes only the window bits; `1` writes a 6-bit leading-zero
//! count, a 6-bit meaningful-bit count, then the meaningful bits, and
//! makes that window current.
//!
//! A meaningful-bit count of 64 is stored as 0 in its 6-bit field; a
//! non-zero XOR can never have zero meaningful bits, so the encoding is
//! unambiguous.

use crate::bits::{BitReader, BitWriter};

/// Sentinel marking the leading/trailing window as not yet established.
const WINDOW_UNSET: u32 = u32::MAX;

/// Encode a sequence of f64 values. Empty input yields an empty buffer.
pub fn encode_values(values: &[f64]) -> Vec<u8> {
    if values.is_empty() {
        return Vec::new();
    }

    let mut writer = BitWriter::with_capacity(values.len() * 4);
    let mut prev_bits = values[0].to_bits();
    writer.write_bits(prev_bits, 64);

    let mut prev_leading = WINDOW_UNSET;
    let mut prev_trailing = WINDOW_UNSET;

    for &value in &values[1..] {
        let cur_bits = value.to_bits();
        let xor = cur_bits ^ prev_bits;

        if xor == 0 {
            writer.write_bit(false);
        } else {
            writer.write_bit(true);

            let leading = xor.leading_zeros();
            let trailing = xor.trailing_zeros();

            if prev_leading != WINDOW_UNSET && leading >= prev_leading && trailing >= prev_trailing
            {
                // Window reuse: only the bits inside the previous window.
                writer.write_bit(false);
                let meaningful = 64 - prev_leading - prev_trailing;
                writer.write_bits(xor >> prev_trailing, meaningful as u8);
            } else {
                writer.write_bit(true);
                let leading = leading.min(63);
                let meaningful = 64 - leading - trailing;
                writer.write_bits(u64::from(leading), 6);
                writer.write_bits(u64::from(meaningful) & 0x3F, 6);
                writer.write_bits(xor >> trailing, meaningful as u8);

                prev_leading = leading;
                prev_trailing = trailing;
            }
        }

        prev_bits = cur_bits;
    }

    writer.finish()
}

/// Decode up to `count` values from an encoded buffer.
///
/// A stream that runs short ends the block with the values decoded so
/// far. NaN round-trips by bit identity.
pub fn decode_values(data: &[u8], count: usize) -> Vec<f64> {
    if data.is_empty() || count == 0 {
        return Vec::new();
    }

    let mut reader = BitReader::new(data);
    let mut result = Vec::with_capacity(count);

    let mut prev_bits = match reader.read_bits(64) {
        Some(bits) => bits,
        None => return result,
    };
    result.push(f64::from_bits(prev_bits));

    let mut prev_leading = WINDOW_UNSET;
    let mut prev_trailing = WINDOW_UNSET;

    while result.len() < count {
        let changed = match reader.read_bit() {
            Some(bit) => bit,
            None => break,
        };

        if changed {
            let new_window = match reader.read_bit() {
                Some(bit) => bit,
                None => break,
            };

            let xor = if new_window {
                let Some(leading) = reader.read_bits(6) else {
                    break;
                };
                let Some(mut meaningful) = reader.read_bits(6) else {
                    break;
                };
                if meaningful == 0 {
                    meaningful = 64;
                }
                let Some(bits) = reader.read_bits(meaningful as u8) else {
                    break;
                };
                let window = 64i32 - leading as i32 - meaningful as i32;
                if window < 0 {
                    // leading + meaningful cannot exceed 64: corrupt stream.
                    break;
                }
                let trailing = window as u32;
                prev_leading = leading as u32;
                prev_trailing = trailing;
                bits << trailing
            } else {
                if prev_leading == WINDOW_UNSET {
                    // Reuse before any window was set: corrupt stream.
                    break;
                }
                let meaningful = 64 - prev_leading - prev_trailing;
                let Some(bits) = reader.read_bits(meaningful as u8) else {
                    break;
                };
                bits << prev_trailing
            };

            prev_bits ^= xor;
        }

        result.push(f64::from_bits(prev_bits));
    }

    result
}
