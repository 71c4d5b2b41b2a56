use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::{BinaryEvent, EventCodec};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Reassembles side-channel events from binary chunks.
///
/// Chunks may split or merge frames arbitrarily; callers push whatever the
/// transport delivered and drain complete events.
pub struct EventAssembler {
    buf: BytesMut,
    codec: EventCodec,
}

impl EventAssembler {
    /// Create an assembler with the default frame size limit.
    pub fn new() -> Self {
        Self::with_codec(EventCodec::default())
    }

    /// Create an assembler with an explicit codec.
    pub fn with_codec(codec: EventCodec) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            codec,
        }
    }

    /// Append a chunk of received data.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Take the next complete event, if any.
    ///
    /// Malformed frames come back as `Some(Err(_))` and are already removed
    /// from the buffer. An oversized frame cannot be skipped, so the buffer
    /// is discarded.
    pub fn next_event(&mut self) -> Option<Result<BinaryEvent>> {
        match self.codec.decode(&mut self.buf) {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => None,
            Err(err @ FrameError::FrameTooLarge { .. }) => {
                self.buf.clear();
                Some(Err(err))
            }
            Err(err) => Some(Err(err)),
        }
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for EventAssembler {
    fn default() -> Self {
        Self::new()
    }
}
