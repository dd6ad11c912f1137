//! Sample format conversion
//! The capture device yields normalized f32 samples; the transport consumes s16le bytes

/// Convert normalized f32 samples to interleaved signed 16-bit little-endian PCM.
/// Each sample is scaled by the maximum positive 16-bit value; out-of-range
/// input saturates rather than wrapping.
pub fn samples_to_s16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}
