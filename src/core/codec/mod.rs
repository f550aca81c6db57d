//! Audio transcoding between the telephony and speech-AI representations.
//!
//! The telephony side carries G.711 μ-law (companded 8-bit samples at 8 kHz
//! mono); the speech-AI side expects linear PCM 16-bit signed little-endian
//! at the same rate, wrapped in a base64 "transport frame" for the text-based
//! event stream. Everything in this module is a pure function: no state,
//! no I/O.
//!
//! # Guarantees
//!
//! - `from_transport_frame(to_transport_frame(pcm)) == pcm` for every valid
//!   PCM buffer (length a multiple of 2).
//! - Encoding/decoding never panics; malformed input yields [`FormatError`].

use base64::prelude::*;
use thiserror::Error;

/// Width in bytes of one linear PCM sample (16-bit).
pub const SAMPLE_WIDTH: usize = 2;

/// Sample rate shared by both sides of the bridge.
pub const SAMPLE_RATE_HZ: u32 = 8000;

/// μ-law companding bias (ITU-T G.711).
const BIAS: i32 = 0x84;

/// Maximum linear magnitude before companding clips.
const CLIP: i32 = 32635;

/// Errors produced by audio framing and transcoding.
///
/// These are recoverable at the component boundary: the offending frame is
/// dropped and logged, the stream continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    /// PCM byte length is not a multiple of the 16-bit sample width.
    #[error("PCM length {0} is not a multiple of the sample width")]
    UnalignedPcm(usize),

    /// The frame contained no audio.
    #[error("empty audio frame")]
    EmptyFrame,

    /// Transport frame was not valid base64.
    #[error("invalid transport frame: {0}")]
    InvalidBase64(String),
}

/// Decode companded μ-law bytes into linear PCM 16-bit little-endian bytes.
///
/// Each input byte becomes one 2-byte sample.
pub fn decode_mulaw(mulaw: &[u8]) -> Result<Vec<u8>, FormatError> {
    if mulaw.is_empty() {
        return Err(FormatError::EmptyFrame);
    }

    let mut pcm = Vec::with_capacity(mulaw.len() * SAMPLE_WIDTH);
    for &byte in mulaw {
        let sample = mulaw_to_linear(byte);
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    Ok(pcm)
}

/// Encode linear PCM 16-bit little-endian bytes into companded μ-law bytes.
///
/// Input length must be a multiple of [`SAMPLE_WIDTH`].
pub fn encode_mulaw(pcm: &[u8]) -> Result<Vec<u8>, FormatError> {
    if pcm.is_empty() {
        return Err(FormatError::EmptyFrame);
    }
    if pcm.len() % SAMPLE_WIDTH != 0 {
        return Err(FormatError::UnalignedPcm(pcm.len()));
    }

    let mut mulaw = Vec::with_capacity(pcm.len() / SAMPLE_WIDTH);
    for chunk in pcm.chunks_exact(SAMPLE_WIDTH) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        mulaw.push(linear_to_mulaw(sample));
    }
    Ok(mulaw)
}

/// Wrap linear PCM bytes into the base64 transport frame used by the
/// speech-AI event stream.
pub fn to_transport_frame(pcm: &[u8]) -> Result<String, FormatError> {
    if pcm.is_empty() {
        return Err(FormatError::EmptyFrame);
    }
    if pcm.len() % SAMPLE_WIDTH != 0 {
        return Err(FormatError::UnalignedPcm(pcm.len()));
    }
    Ok(BASE64_STANDARD.encode(pcm))
}

/// Unwrap a base64 transport frame back into linear PCM bytes.
pub fn from_transport_frame(frame: &str) -> Result<Vec<u8>, FormatError> {
    let pcm = BASE64_STANDARD
        .decode(frame)
        .map_err(|e| FormatError::InvalidBase64(e.to_string()))?;
    if pcm.is_empty() {
        return Err(FormatError::EmptyFrame);
    }
    if pcm.len() % SAMPLE_WIDTH != 0 {
        return Err(FormatError::UnalignedPcm(pcm.len()));
    }
    Ok(pcm)
}

/// Expand one μ-law byte to a linear 16-bit sample (ITU-T G.711).
fn mulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = ((byte >> 4) & 0x07) as i32;
    let mantissa = (byte & 0x0F) as i32;

    let mut magnitude = ((mantissa << 3) + BIAS) << exponent;
    magnitude -= BIAS;

    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Compand one linear 16-bit sample to a μ-law byte (ITU-T G.711).
fn linear_to_mulaw(sample: i16) -> u8 {
    let mut magnitude = i32::from(sample);
    let sign: u8 = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };

    if magnitude > CLIP {
        magnitude = CLIP;
    }
    magnitude += BIAS;

    // Segment number: position of the highest set bit above bit 7.
    let mut exponent: u32 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (magnitude & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
    !(sign | ((exponent as u8) << 4) | mantissa)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_frame_round_trip() {
        let pcm: Vec<u8> = (0..320u16).flat_map(|i| (i as i16 * 7).to_le_bytes()).collect();
        let frame = to_transport_frame(&pcm).unwrap();
        let decoded = from_transport_frame(&frame).unwrap();
        assert_eq!(decoded, pcm);
    }

    #[test]
    fn test_transport_frame_rejects_odd_length() {
        let err = to_transport_frame(&[0u8; 321]).unwrap_err();
        assert_eq!(err, FormatError::UnalignedPcm(321));
    }

    #[test]
    fn test_transport_frame_rejects_empty() {
        assert_eq!(to_transport_frame(&[]).unwrap_err(), FormatError::EmptyFrame);
        // base64 of an empty buffer decodes empty as well
        assert_eq!(from_transport_frame("").unwrap_err(), FormatError::EmptyFrame);
    }

    #[test]
    fn test_from_transport_frame_rejects_bad_base64() {
        let err = from_transport_frame("not@base64!").unwrap_err();
        assert!(matches!(err, FormatError::InvalidBase64(_)));
    }

    #[test]
    fn test_mulaw_silence() {
        // μ-law 0xFF is positive zero
        let pcm = decode_mulaw(&[0xFF]).unwrap();
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 0);
        assert_eq!(linear_to_mulaw(0), 0xFF);
    }

    #[test]
    fn test_mulaw_decode_expands_width() {
        let pcm = decode_mulaw(&[0x00, 0x7F, 0x80, 0xFF]).unwrap();
        assert_eq!(pcm.len(), 4 * SAMPLE_WIDTH);
    }

    #[test]
    fn test_mulaw_sign_symmetry() {
        for byte in 0u8..=255 {
            let positive = mulaw_to_linear(byte & 0x7F | 0x80);
            let negative = mulaw_to_linear(byte & 0x7F);
            // Clearing/setting the sign bit mirrors the magnitude
            assert_eq!(positive, -negative, "byte {byte:#04x}");
        }
    }

    #[test]
    fn test_mulaw_round_trip_tolerance() {
        // Companding is lossy; a re-encoded sample must land in the same
        // quantization segment (encode(decode(b)) == b for every code).
        for byte in 0u8..=255 {
            let linear = mulaw_to_linear(byte);
            let back = linear_to_mulaw(linear);
            // 0x7F and 0xFF are both zero codes
            let canonical = if byte == 0x7F { 0xFF } else { byte };
            assert_eq!(back, canonical, "byte {byte:#04x} -> {linear} -> {back:#04x}");
        }
    }

    #[test]
    fn test_mulaw_clips_extremes() {
        assert_eq!(linear_to_mulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_mulaw(i16::MIN), 0x00);
    }

    #[test]
    fn test_encode_mulaw_rejects_unaligned() {
        assert_eq!(
            encode_mulaw(&[1, 2, 3]).unwrap_err(),
            FormatError::UnalignedPcm(3)
        );
    }
}
