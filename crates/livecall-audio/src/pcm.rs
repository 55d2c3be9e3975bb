//! PCM wire codec: float samples <-> 16-bit little-endian bytes <-> base64
//! transport text.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Rate of outbound microphone audio.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Rate of inbound agent audio.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Encode float samples in [-1, 1] as signed 16-bit little-endian PCM.
/// Out-of-range input is clamped, never rejected.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = sample.clamp(-1.0, 1.0);
        let v = if s < 0.0 {
            (s * 32768.0) as i16
        } else {
            (s * 32767.0) as i16
        };
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM into float samples in [-1, 1].
///
/// A trailing odd byte is ignored. `channels` greater than one downmixes by
/// averaging each interleaved frame.
pub fn decode_pcm16(bytes: &[u8], channels: u16) -> Vec<f32> {
    let samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();

    if channels <= 1 {
        return samples;
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Binary-to-text transport encoding for media payloads.
pub fn to_transport_text(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Inverse of [`to_transport_text`].
pub fn from_transport_text(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_text_round_trip() {
        let buffers: Vec<Vec<u8>> = vec![
            vec![],
            vec![0],
            vec![0xff, 0x00, 0x7f, 0x80],
            (0..=255u8).collect(),
            vec![1, 2, 3, 4, 5, 6, 7],
        ];
        for b in buffers {
            assert_eq!(from_transport_text(&to_transport_text(&b)).unwrap(), b);
        }
    }

    #[test]
    fn pcm_round_trip_bounded_error() {
        // Negative values quantize on the exact 1/32768 grid; positive
        // values carry the extra 32767/32768 scale skew on top of the
        // quantization step.
        let mut f = -1.0f32;
        while f <= 1.0 {
            let decoded = decode_pcm16(&encode_pcm16(&[f]), 1);
            let bound = if f <= 0.0 { 1.0 / 32768.0 } else { 2.0 / 32768.0 };
            assert!(
                (decoded[0] - f).abs() < bound,
                "f={} decoded={}",
                f,
                decoded[0]
            );
            f += 0.0007;
        }
    }

    #[test]
    fn pcm_round_trip_exact_from_integer_grid() {
        for v in [-32768i16, -32767, -1, 0, 1, 12345, 32767] {
            let f = v as f32 / 32768.0;
            let bytes = encode_pcm16(&[f]);
            let round = i16::from_le_bytes([bytes[0], bytes[1]]);
            // Re-encoding a decoded sample loses at most one step.
            assert!((round as i32 - v as i32).abs() <= 1, "v={} round={}", v, round);
        }
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        assert_eq!(encode_pcm16(&[2.0, -2.0]), encode_pcm16(&[1.0, -1.0]));
        assert_eq!(
            encode_pcm16(&[f32::INFINITY, f32::NEG_INFINITY]),
            encode_pcm16(&[1.0, -1.0])
        );
    }

    #[test]
    fn full_scale_values() {
        let bytes = encode_pcm16(&[1.0, -1.0, 0.0]);
        assert_eq!(bytes.len(), 6);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -32768);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), 0);
    }

    #[test]
    fn decode_ignores_trailing_odd_byte() {
        let decoded = decode_pcm16(&[0x00, 0x40, 0x7f], 1);
        assert_eq!(decoded.len(), 1);
        assert!((decoded[0] - 0.5).abs() < 0.001);
    }

    #[test]
    fn decode_stereo_downmix_averages() {
        // One stereo frame: +0.5 and -0.5 average to 0.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&16384i16.to_le_bytes());
        bytes.extend_from_slice(&(-16384i16).to_le_bytes());
        let decoded = decode_pcm16(&bytes, 2);
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].abs() < 0.001);
    }
}
