//! Frame codec: PCM16 audio frames ⇄ the transport's base64 text encoding.
//!
//! Stateless and lossless for valid inputs. Decode failures surface as
//! [`Error::MalformedPayload`] so the caller can log and drop the frame
//! without terminating the stream.

use base64::Engine;

use crate::audio::{AudioFrame, BYTES_PER_SAMPLE};
use crate::error::{Error, Result};

/// Encode a frame's PCM payload as a wire-safe base64 string.
pub fn encode(frame: &AudioFrame) -> String {
    base64::engine::general_purpose::STANDARD.encode(frame.bytes())
}

/// Decode a wire payload back into a frame, tagging it with `seq`
/// (arrival order for inbound audio).
///
/// Fails with [`Error::MalformedPayload`] on invalid base64 or on an odd
/// byte count (a torn PCM16 sample).
pub fn decode(payload: &str, seq: u64) -> Result<AudioFrame> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| Error::MalformedPayload(format!("invalid base64: {e}")))?;
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(Error::MalformedPayload(format!(
            "torn PCM16 sample: {} bytes",
            bytes.len()
        )));
    }
    Ok(AudioFrame::new(seq, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_law() {
        let frame = AudioFrame::new(7, vec![0x01, 0x02, 0xfe, 0xff, 0x00, 0x80]);
        let encoded = encode(&frame);
        let decoded = decode(&encoded, frame.seq()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn round_trip_empty_frame() {
        let frame = AudioFrame::new(0, Vec::new());
        assert_eq!(decode(&encode(&frame), 0).unwrap(), frame);
    }

    #[test]
    fn invalid_base64_is_malformed() {
        let err = decode("not!valid!base64!", 0).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[test]
    fn odd_byte_count_is_malformed() {
        // Three raw bytes encode fine but cannot be PCM16.
        let payload = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        let err = decode(&payload, 0).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[test]
    fn decode_tags_arrival_seq() {
        let payload = base64::engine::general_purpose::STANDARD.encode([0u8, 0]);
        assert_eq!(decode(&payload, 42).unwrap().seq(), 42);
    }
}
