//! Delta-of-delta timestamp codec.
//!
//! Layout: the first timestamp is 64 raw bits, the first delta is 64 raw
//! bits, and every later timestamp encodes the change in delta with a
//! prefix code:
//!
//! | delta-of-delta      | prefix | payload bits |
//! |---------------------|--------|--------------|
//! | 0                   | `0`    | 0            |
//! | \[-64, 63\]         | `10`   | 7            |
//! | \[-256, 255\]       | `110`  | 9            |
//! | \[-2048, 2047\]     | `1110` | 12           |
//! | otherwise           | `1111` | 64           |
//!
//! Payloads are two's complement and sign-extended on read.

use crate::bits::{sign_extend, BitReader, BitWriter};

/// Encode a sequence of timestamps. Empty input yields an empty buffer.
pub fn encode_timestamps(values: &[i64]) -> Vec<u8> {
    if values.is_empty() {
        return Vec::new();
    }

    let mut writer = BitWriter::with_capacity(values.len() * 2);
    writer.write_bits(values[0] as u64, 64);

    if values.len() == 1 {
        return writer.finish();
    }

    let first_delta = values[1].wrapping_sub(values[0]);
    writer.write_bits(first_delta as u64, 64);

    let mut prev_value = values[1];
    let mut prev_delta = first_delta;

    for &value in &values[2..] {
        let delta = value.wrapping_sub(prev_value);
        let dod = delta.wrapping_sub(prev_delta);

        if dod == 0 {
            writer.write_bit(false);
        } else if (-64..=63).contains(&dod) {
            writer.write_bits(0b10, 2);
            writer.write_bits((dod as u64) & 0x7F, 7);
        } else if (-256..=255).contains(&dod) {
            writer.write_bits(0b110, 3);
            writer.write_bits((dod as u64) & 0x1FF, 9);
        } else if (-2048..=2047).contains(&dod) {
            writer.write_bits(0b1110, 4);
            writer.write_bits((dod as u64) & 0xFFF, 12);
        } else {
            writer.write_bits(0b1111, 4);
            writer.write_bits(dod as u64, 64);
        }

        prev_value = value;
        prev_delta = delta;
    }

    writer.finish()
}

/// Decode up to `count` timestamps from an encoded buffer.
///
/// A stream that runs short ends the block: the values decoded so far
/// are returned and the caller decides whether that is a format fault.
pub fn decode_timestamps(data: &[u8], count: usize) -> Vec<i64> {
    if data.is_empty() || count == 0 {
        return Vec::new();
    }

    let mut reader = BitReader::new(data);
    let mut result = Vec::with_capacity(count);

    let first = match reader.read_bits(64) {
        Some(bits) => bits as i64,
        None => return result,
    };
    result.push(first);
    if count == 1 {
        return result;
    }

    let first_delta = match reader.read_bits(64) {
        Some(bits) => bits as i64,
        None => return result,
    };
    let mut prev_value = first.wrapping_add(first_delta);
    let mut prev_delta = first_delta;
    result.push(prev_value);

    while result.len() < count {
        let dod = match read_delta_of_delta(&mut reader) {
            Some(dod) => dod,
            None => break,
        };
        let delta = prev_delta.wrapping_add(dod);
        prev_value = prev_value.wrapping_add(delta);
        prev_delta = delta;
        result.push(prev_value);
    }

    result
}

/// Read one prefix-coded delta-of-delta, or `None` at end of stream.
fn read_delta_of_delta(reader: &mut BitReader<'_>) -> Option<i64> {
    if !reader.read_bit()? {
        return Some(0);
    }
    if !reader.read_bit()? {
        return Some(sign_extend(reader.read_bits(7)?, 7));
    }
    if !reader.read_bit()? {
        return Some(sign_extend(reader.read_bits(9)?, 9));
    }
    if !reader.read_bit()? {
        return Some(sign_extend(reader.read_bits(12)?, 12));
    }
    Some(reader.read_bits(64)? as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn roundtrip(values: &[i64]) {
        let encoded = encode_timestamps(values);
        let decoded = decode_timestamps(&encoded, values.len());
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_empty() {
        assert!(encode_timestamps(&[]).is_empty());
        assert!(decode_timestamps(&[], 0).is_empty());
        assert!(decode_timestamps(&[1, 2, 3], 0).is_empty());
    }

    #[test]
    fn test_single_value() {
        roundtrip(&[1609459200]);
        roundtrip(&[0]);
        roundtrip(&[-1]);
        roundtrip(&[i64::MAX]);
        roundtrip(&[i64::MIN]);
    }

    #[test]
    fn test_two_values() {
        roundtrip(&[100, 101]);
        roundtrip(&[100, 50]);
        roundtrip(&[0, i64::MAX]);
    }

    #[test]
    fn test_constant_cadence() {
        let values: Vec<i64> = (0..500).map(|i| 1609459200 + i * 10).collect();
        roundtrip(&values);

        // Constant delta means one bit per timestamp after the header.
        let encoded = encode_timestamps(&values);
        assert!(
            encoded.len() < 16 + 500 / 8 + 2,
            "constant cadence should compress to ~1 bit/point, got {} bytes",
            encoded.len()
        );
    }

    #[test]
    fn test_each_prefix_class() {
        // Deltas chosen so consecutive delta-of-deltas land in every
        // payload width: 0, 7-bit, 9-bit, 12-bit and the 64-bit escape.
        roundtrip(&[0, 10, 20, 30]); // dod = 0
        roundtrip(&[0, 10, 83, 156]); // dod = 63, 0
        roundtrip(&[0, 10, 275, 540]); // dod = 255, 0
        roundtrip(&[0, 10, 2057, 4104]); // dod = 2047, 0
        roundtrip(&[0, 10, 1_000_030, 2_000_050]); // dod far out of range
        roundtrip(&[100, 36, 100, 36]); // negative dods
    }

    #[test]
    fn test_boundary_dods() {
        for dod in [-64i64, 63, -65, 64, -256, 255, -257, 256, -2048, 2047, -2049, 2048] {
            let values = vec![0, 100, 200 + dod];
            roundtrip(&values);
        }
    }

    #[test]
    fn test_jittered_cadence_roundtrip() {
        // 1000 timestamps at 1 Hz with random +/-1 s jitter; the encoded
        // stream must reproduce exactly and beat 8 bytes per value.
        let mut rng = rand::thread_rng();
        let mut values = Vec::with_capacity(1000);
        let mut ts = 1609459200i64;
        for _ in 0..1000 {
            ts += 1 + rng.gen_range(-1i64..=1);
            values.push(ts);
        }

        let encoded = encode_timestamps(&values);
        assert!(
            encoded.len() < 8 * values.len(),
            "expected < {} bytes, got {}",
            8 * values.len(),
            encoded.len()
        );
        assert_eq!(decode_timestamps(&encoded, values.len()), values);
    }

    #[test]
    fn test_unsorted_input_roundtrips() {
        // The codec itself does not require sorted input.
        roundtrip(&[50, 10, 90, 20, 80]);
    }

    #[test]
    fn test_truncated_stream_returns_prefix() {
        let values: Vec<i64> = (0..100).map(|i| i * 7).collect();
        let encoded = encode_timestamps(&values);

        let truncated = &encoded[..encoded.len() / 2];
        let decoded = decode_timestamps(truncated, values.len());
        assert!(decoded.len() < values.len());
        assert_eq!(&values[..decoded.len()], &decoded[..]);
    }
}
