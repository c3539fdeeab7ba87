//! pulse-codec: bit-level I/O and the column codecs.
//!
//! Timestamps compress with delta-of-delta coding (most series tick at a
//! fixed cadence, so the second difference is usually zero). Values
//! compress with XOR coding over the raw f64 bits. Both codecs are
//! lossless: decoding `n` values from the output of encoding those `n`
//! values reproduces the input bit-for-bit.

pub mod bits;
pub mod timestamp;
pub mod value;

pub use bits::{BitReader, BitWriter};
pub use timestamp::{decode_timestamps, encode_timestamps};
pub use value::{decode_values, encode_values};
