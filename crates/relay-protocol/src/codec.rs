//! Codecs for Relay frames.
//!
//! Two encodings are supported:
//!
//! - **Text**: one JSON object per WebSocket text message.
//! - **Binary**: a 4-byte big-endian length prefix followed by a
//!   MessagePack-encoded frame. Several frames may share one buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a frame as a JSON string.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode_text(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode a frame from a JSON string.
///
/// # Errors
///
/// Returns an error if the text is too large, not JSON, or not a known frame.
pub fn decode_text(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode a frame to length-prefixed MessagePack.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Read the length prefix, if enough bytes are available.
fn frame_length(data: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let Some(prefix) = data.get(..LENGTH_PREFIX_SIZE) else {
        return Ok(None);
    };
    let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    Ok(Some(length))
}

/// Decode a single frame from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let length = frame_length(data)?
        .ok_or(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE.saturating_sub(data.len())))?;

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid. A frame that fails
/// to deserialize is consumed; an oversized length prefix is not, and the
/// caller should discard the buffer.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    let Some(length) = frame_length(buf)? else {
        return Ok(None);
    };

    if buf.len() < LENGTH_PREFIX_SIZE + length {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    Ok(Some(rmp_serde::from_slice(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{error_codes, Envelope};

    #[test]
    fn test_binary_roundtrip() {
        let frames = vec![
            Frame::broadcast("Hello, world!"),
            Frame::direct("client_2", "psst"),
            Frame::ping(),
            Frame::welcome("client_1", 1_700_000_000_000),
            Frame::Message(Envelope {
                id: "msg_1".into(),
                from: "client_1".into(),
                to: Some("client_2".into()),
                content: "hi".into(),
                timestamp: 1,
            }),
            Frame::error(error_codes::SESSION_NOT_FOUND, "Session not found"),
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            assert_eq!(decode(&encoded).unwrap(), frame);
        }
    }

    #[test]
    fn test_text_matches_browser_format() {
        let text = encode_text(&Frame::pong(5)).unwrap();
        assert_eq!(text, r#"{"type":"pong","timestamp":5}"#);

        let frame = decode_text(r#"{"type":"broadcast","content":"hey"}"#).unwrap();
        assert_eq!(frame, Frame::broadcast("hey"));
    }

    #[test]
    fn test_decode_text_rejects_garbage() {
        assert!(matches!(
            decode_text("not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(decode_text(r#"{"type":"broadcast"}"#).is_err());
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&Frame::broadcast("test")).unwrap();

        match decode(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
        match decode(&encoded[..2]) {
            Err(ProtocolError::Incomplete(2)) => {}
            other => panic!("Expected Incomplete(2), got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let frame = Frame::broadcast("x".repeat(MAX_FRAME_SIZE + 1));

        assert!(matches!(encode(&frame), Err(ProtocolError::FrameTooLarge(_))));
        assert!(matches!(
            encode_text(&frame),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_streaming_decode() {
        let frame1 = Frame::broadcast("one");
        let frame2 = Frame::direct("client_9", "two");

        let mut buf = BytesMut::new();
        encode_into(&frame1, &mut buf).unwrap();
        encode_into(&frame2, &mut buf).unwrap();

        // Hold back the last byte: only the first frame is complete.
        let last = buf.split_off(buf.len() - 1);
        assert_eq!(decode_from(&mut buf).unwrap(), Some(frame1));
        assert_eq!(decode_from(&mut buf).unwrap(), None);

        buf.unsplit(last);
        assert_eq!(decode_from(&mut buf).unwrap(), Some(frame2));
        assert!(buf.is_empty());
    }
}
