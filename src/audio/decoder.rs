//! # PCM Frame Decoding
//!
//! Converts raw binary audio frames received over the streaming connection
//! into normalized floating-point samples for the transcription pipeline.
//!
//! ## Wire Format:
//! - **Encoding**: 16-bit signed PCM, little-endian
//! - **Channels**: Mono (1 channel)
//! - **Chunking**: Arbitrary — clients may split samples across frames however
//!   they like, including mid-sample
//!
//! ## Odd-Length Frames:
//! A frame that ends mid-sample (odd byte count) is zero-padded with exactly
//! one byte before conversion, so every frame yields a whole number of
//! samples. Decoding never fails; there is no rejected-frame path.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Scale factor between the i16 PCM range and the [-1.0, 1.0] float range.
const PCM_SCALE: f32 = 32768.0;

/// Decode one binary PCM frame into normalized f32 samples.
///
/// ## Guarantees:
/// - Output length is exactly `ceil(data.len() / 2)` samples
/// - Every sample lies in [-1.0, 1.0)
/// - An empty frame decodes to zero samples (not an error)
pub fn decode_pcm_frame(data: &[u8]) -> Vec<f32> {
    if data.is_empty() {
        return Vec::new();
    }

    // Pad a trailing half-sample with one zero byte so the final i16 read
    // sees the odd byte as its low-order half.
    let padded;
    let bytes: &[u8] = if data.len() % 2 != 0 {
        let mut owned = Vec::with_capacity(data.len() + 1);
        owned.extend_from_slice(data);
        owned.push(0);
        padded = owned;
        &padded
    } else {
        data
    };

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / PCM_SCALE);
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_frame_decodes_every_sample() {
        // Two samples: 0 and 16384 (= 0.5 after normalization)
        let data = [0u8, 0, 0, 64];
        let samples = decode_pcm_frame(&data);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_odd_frame_is_padded_with_one_zero_byte() {
        // 5 bytes -> ceil(5/2) = 3 samples; the trailing 0x01 byte becomes
        // the low byte of the final sample (0x0001).
        let data = [0u8, 0, 0, 0, 1];
        let samples = decode_pcm_frame(&data);
        assert_eq!(samples.len(), 3);
        assert!((samples[2] - 1.0 / 32768.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_count_is_ceil_of_half_length() {
        for len in 0..64 {
            let data = vec![0x7fu8; len];
            let samples = decode_pcm_frame(&data);
            assert_eq!(samples.len(), len.div_ceil(2), "byte length {}", len);
        }
    }

    #[test]
    fn test_normalization_range() {
        let data = [
            0x00, 0x80, // i16::MIN = -32768 -> -1.0
            0xff, 0x7f, // i16::MAX = 32767 -> just below 1.0
        ];
        let samples = decode_pcm_frame(&data);
        assert_eq!(samples[0], -1.0);
        assert!(samples[1] < 1.0 && samples[1] > 0.999);
    }

    #[test]
    fn test_empty_frame_yields_no_samples() {
        assert!(decode_pcm_frame(&[]).is_empty());
    }
}
