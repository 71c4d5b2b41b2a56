use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::Decoder;

use crate::error::{FrameError, Result};

/// Size of each of the two length prefixes.
pub const LENGTH_SIZE: usize = 4;

/// Trailer at the end of every payload: type (4) + length (4).
pub const TRAILER_SIZE: usize = 8;

/// Default maximum frame size (both prefixes, header and payload): 256 MiB.
pub const DEFAULT_MAX_FRAME: usize = 256 * 1024 * 1024;

/// Structured header of a side-channel event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventHeader {
    /// Routing label (sinks are selected by it).
    pub label: String,
    /// Remaining header fields, preserved as sent.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl EventHeader {
    /// Header with only a label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            fields: serde_json::Map::new(),
        }
    }
}

/// The `{type, length}` pair closing every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub event_type: u32,
    pub length: u32,
}

/// A decoded side-channel event.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryEvent {
    pub header: EventHeader,
    /// The complete L2 payload, trailer included.
    pub payload: Bytes,
    pub trailer: Trailer,
}

impl BinaryEvent {
    /// Event label from the header.
    pub fn label(&self) -> &str {
        &self.header.label
    }

    /// Payload bytes without the trailer.
    pub fn body(&self) -> &[u8] {
        &self.payload[..self.payload.len() - TRAILER_SIZE]
    }
}

/// Encode an event into the wire format.
///
/// Wire format (all little-endian):
/// ```text
/// ┌──────────┬──────────────┬──────────┬────────────────────────────────┐
/// │ L1 (4B)  │ header (L1B) │ L2 (4B)  │ payload (L2B)                  │
/// │          │ JSON, label  │          │ body ... │ type (4B) │ len (4B) │
/// └──────────┴──────────────┴──────────┴────────────────────────────────┘
/// ```
pub fn encode_event(
    header: &EventHeader,
    body: &[u8],
    trailer: Trailer,
    dst: &mut BytesMut,
) -> Result<()> {
    let header_bytes =
        serde_json::to_vec(header).map_err(|err| FrameError::InvalidHeader(err.to_string()))?;
    let payload_len = body.len() + TRAILER_SIZE;
    for size in [header_bytes.len(), payload_len] {
        if size > u32::MAX as usize {
            return Err(FrameError::FrameTooLarge {
                size,
                max: u32::MAX as usize,
            });
        }
    }

    dst.reserve(2 * LENGTH_SIZE + header_bytes.len() + payload_len);
    dst.put_u32_le(header_bytes.len() as u32);
    dst.put_slice(&header_bytes);
    dst.put_u32_le(payload_len as u32);
    dst.put_slice(body);
    dst.put_u32_le(trailer.event_type);
    dst.put_u32_le(trailer.length);
    Ok(())
}

/// Decode an event from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// Once a frame is complete its bytes are consumed, even when the header or
/// trailer turns out to be malformed, so the caller can drop it and go on.
pub fn decode_event(src: &mut BytesMut, max_frame: usize) -> Result<Option<BinaryEvent>> {
    if src.len() < LENGTH_SIZE {
        return Ok(None);
    }
    let header_len = read_u32_le(&src[..LENGTH_SIZE]) as usize;
    let payload_prefix = LENGTH_SIZE + header_len;
    if payload_prefix + LENGTH_SIZE > max_frame {
        return Err(FrameError::FrameTooLarge {
            size: payload_prefix + LENGTH_SIZE,
            max: max_frame,
        });
    }
    if src.len() < payload_prefix + LENGTH_SIZE {
        return Ok(None);
    }

    let payload_len = read_u32_le(&src[payload_prefix..payload_prefix + LENGTH_SIZE]) as usize;
    let total = payload_prefix + LENGTH_SIZE + payload_len;
    if total > max_frame {
        return Err(FrameError::FrameTooLarge {
            size: total,
            max: max_frame,
        });
    }
    if src.len() < total {
        return Ok(None);
    }

    src.advance(LENGTH_SIZE);
    let header_bytes = src.split_to(header_len);
    src.advance(LENGTH_SIZE);
    let payload = src.split_to(payload_len).freeze();

    let header: EventHeader = serde_json::from_slice(&header_bytes)
        .map_err(|err| FrameError::InvalidHeader(err.to_string()))?;

    if payload.len() < TRAILER_SIZE {
        return Err(FrameError::MissingTrailer {
            len: payload.len(),
            min: TRAILER_SIZE,
        });
    }
    let tail = payload.len() - TRAILER_SIZE;
    let trailer = Trailer {
        event_type: read_u32_le(&payload[tail..tail + 4]),
        length: read_u32_le(&payload[tail + 4..]),
    };

    Ok(Some(BinaryEvent {
        header,
        payload,
        trailer,
    }))
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// `tokio_util` decoder for side-channel events.
#[derive(Debug, Clone)]
pub struct EventCodec {
    max_frame_size: usize,
}

impl EventCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for EventCodec {
    type Item = BinaryEvent;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BinaryEvent>> {
        decode_event(src, self.max_frame_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(label: &str) -> EventHeader {
        let mut header = EventHeader::new(label);
        header
            .fields
            .insert("data".to_string(), serde_json::json!({"cell": 1}));
        header
    }

    const TRAILER: Trailer = Trailer {
        event_type: 3,
        length: 16,
    };

    #[test]
    fn decode_complete_frame() {
        let mut buf = BytesMut::new();
        encode_event(&header("prach"), b"samples!", TRAILER, &mut buf).unwrap();

        let event = decode_event(&mut buf, DEFAULT_MAX_FRAME).unwrap().unwrap();
        assert_eq!(event.label(), "prach");
        assert_eq!(event.body(), b"samples!");
        assert_eq!(event.payload.len(), 8 + TRAILER_SIZE);
        assert_eq!(event.trailer, TRAILER);
        assert_eq!(event.header.fields["data"]["cell"], 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn trailer_is_read_from_payload_end() {
        let mut buf = BytesMut::new();
        let header_bytes = br#"{"label":"x"}"#;
        buf.put_u32_le(header_bytes.len() as u32);
        buf.put_slice(header_bytes);
        buf.put_u32_le(12);
        buf.put_u32_le(0xAAAA_AAAA);
        buf.put_u32_le(7);
        buf.put_u32_le(99);

        let event = decode_event(&mut buf, DEFAULT_MAX_FRAME).unwrap().unwrap();
        assert_eq!(
            event.trailer,
            Trailer {
                event_type: 7,
                length: 99
            }
        );
        assert_eq!(event.body(), &0xAAAA_AAAAu32.to_le_bytes());
    }

    #[test]
    fn incomplete_prefix_and_body_wait_for_more() {
        let mut full = BytesMut::new();
        encode_event(&header("a"), b"xyz", TRAILER, &mut full).unwrap();

        for cut in [0, 3, 4, 10, full.len() - 1] {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(decode_event(&mut partial, DEFAULT_MAX_FRAME)
                .unwrap()
                .is_none());
            assert_eq!(partial.len(), cut, "nothing consumed at cut {cut}");
        }
    }

    #[test]
    fn malformed_header_consumes_frame() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(5);
        buf.put_slice(b"{nope");
        buf.put_u32_le(8);
        buf.put_slice(&[0u8; 8]);
        encode_event(&header("next"), b"", TRAILER, &mut buf).unwrap();

        let err = decode_event(&mut buf, DEFAULT_MAX_FRAME).unwrap_err();
        assert!(matches!(err, FrameError::InvalidHeader(_)));

        let next = decode_event(&mut buf, DEFAULT_MAX_FRAME).unwrap().unwrap();
        assert_eq!(next.label(), "next");
    }

    #[test]
    fn header_without_label_is_invalid() {
        let mut buf = BytesMut::new();
        let header_bytes = br#"{"data":1}"#;
        buf.put_u32_le(header_bytes.len() as u32);
        buf.put_slice(header_bytes);
        buf.put_u32_le(8);
        buf.put_slice(&[0u8; 8]);

        assert!(matches!(
            decode_event(&mut buf, DEFAULT_MAX_FRAME),
            Err(FrameError::InvalidHeader(_))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn short_payload_has_no_trailer() {
        let mut buf = BytesMut::new();
        let header_bytes = br#"{"label":"x"}"#;
        buf.put_u32_le(header_bytes.len() as u32);
        buf.put_slice(header_bytes);
        buf.put_u32_le(4);
        buf.put_slice(&[1, 2, 3, 4]);

        assert!(matches!(
            decode_event(&mut buf, DEFAULT_MAX_FRAME),
            Err(FrameError::MissingTrailer { len: 4, .. })
        ));
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(2);
        buf.put_slice(b"{}");
        buf.put_u32_le(1024);

        assert!(matches!(
            decode_event(&mut buf, 64),
            Err(FrameError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn codec_decodes_back_to_back_frames() {
        let mut buf = BytesMut::new();
        encode_event(&header("one"), b"1", TRAILER, &mut buf).unwrap();
        encode_event(&header("two"), b"22", TRAILER, &mut buf).unwrap();

        let mut codec = EventCodec::default();
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!((first.label(), first.body()), ("one", b"1".as_ref()));
        assert_eq!((second.label(), second.body()), ("two", b"22".as_ref()));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
