//! Scalar codec: packs a normalized value into four 8-bit channels.
//!
//! Every field the kernel keeps (water, terrain, fluxes, masks) stores one
//! value per cell as four bytes. The value is split into radix-255 digits,
//! most significant first:
//!
//! ```text
//! value ≈ c0/255 + c1/255² + c2/255³ + c3/255⁴
//! ```
//!
//! Viewing each channel as a unit float (`c / 255`) this is the familiar
//! `c0 + c1/255 + c2/65025 + c3/16581375`. The same layout is produced by the
//! WGSL passes (one little-endian `u32` per cell), so bytes read back from
//! the GPU decode with [`decode`] unchanged.

/// Channel radix.
const RADIX: u64 = 255;

/// Number of representable steps between 0.0 and 1.0 (255⁴).
const STEPS: u64 = RADIX * RADIX * RADIX * RADIX;

/// Digit weights relative to the least significant channel, most significant first.
pub const CHANNEL_WEIGHTS: [u64; 4] = [RADIX * RADIX * RADIX, RADIX * RADIX, RADIX, 1];

/// Worst-case round-trip error relative to the field's value range.
pub const PRECISION: f64 = 1.0 / 16_581_375.0;

/// Bytes per encoded cell.
pub const BYTES_PER_CELL: usize = 4;

/// Encodes a normalized value into four channels, most significant first.
///
/// Encoding truncates, so `decode(encode(v)) <= v`. Values outside `[0, 1]`
/// wrap to their fractional part; callers clamp before encoding.
#[must_use]
pub fn encode(value: f32) -> [u8; 4] {
    let v = wrap_unit(f64::from(value));
    let q = ((v * STEPS as f64).floor() as u64).min(STEPS);
    if q == STEPS {
        return [255, 0, 0, 0];
    }
    CHANNEL_WEIGHTS.map(|weight| ((q / weight) % RADIX) as u8)
}

/// Decodes four channels produced by [`encode`].
#[must_use]
pub fn decode(channels: [u8; 4]) -> f32 {
    decode_f64(channels) as f32
}

/// Decodes at double precision (used by the mass accountant).
#[must_use]
pub fn decode_f64(channels: [u8; 4]) -> f64 {
    let [c0, c1, c2, c3] = channels.map(|c| f64::from(c) / 255.0);
    c0 + c1 / 255.0 + c2 / 65_025.0 + c3 / 16_581_375.0
}

/// Reads the channels of cell `index` from a packed byte slice.
#[inline]
#[must_use]
pub fn read_cell(bytes: &[u8], index: usize) -> [u8; 4] {
    let at = index * BYTES_PER_CELL;
    [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]
}

/// Writes the channels of cell `index` into a packed byte slice.
#[inline]
pub fn write_cell(bytes: &mut [u8], index: usize, channels: [u8; 4]) {
    let at = index * BYTES_PER_CELL;
    bytes[at..at + BYTES_PER_CELL].copy_from_slice(&channels);
}

/// Encodes a slice of normalized values into a packed byte buffer.
#[must_use]
pub fn encode_slice(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|&v| encode(v)).collect()
}

/// Decodes a packed byte buffer into normalized values.
#[must_use]
pub fn decode_slice(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(BYTES_PER_CELL)
        .map(|c| decode([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn wrap_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else if (0.0..=1.0).contains(&v) {
        v
    } else {
        v.rem_euclid(1.0)
    }
}
