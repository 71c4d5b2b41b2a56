//! Raw IQ capture record format.
//!
//! A capture file is a sequence of records, all little-endian:
//! ```text
//! ┌───────────────┬────────────────┬─────────────┬──────────────────────────┐
//! │ ts low (4B)   │ ts high (4B)   │ count (4B)  │ count × (I i32, Q i32)   │
//! └───────────────┴────────────────┴─────────────┴──────────────────────────┘
//! ```

use bytes::{BufMut, BytesMut};

/// Timestamp (8) + sample count (4).
pub const RECORD_HEADER_SIZE: usize = 12;

/// One interleaved I/Q sample: two 32-bit integers.
pub const SAMPLE_SIZE: usize = 8;

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Absolute sample timestamp of the first sample.
    pub timestamp: u64,
    /// Number of I/Q samples following the header.
    pub count: u32,
}

impl RecordHeader {
    /// Decode a header from exactly [`RECORD_HEADER_SIZE`] bytes.
    pub fn decode(bytes: &[u8; RECORD_HEADER_SIZE]) -> Self {
        let low = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let high = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let count = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        Self {
            timestamp: (u64::from(high) << 32) | u64::from(low),
            count,
        }
    }

    /// Size of the sample body in bytes.
    pub fn body_len(&self) -> u64 {
        u64::from(self.count) * SAMPLE_SIZE as u64
    }

    /// Size of the whole record in bytes.
    pub fn extent(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + self.body_len()
    }
}

/// Append one record to `dst`.
pub fn encode_record(timestamp: u64, samples: &[(i32, i32)], dst: &mut BytesMut) {
    dst.reserve(RECORD_HEADER_SIZE + samples.len() * SAMPLE_SIZE);
    dst.put_u32_le(timestamp as u32);
    dst.put_u32_le((timestamp >> 32) as u32);
    dst.put_u32_le(samples.len() as u32);
    for &(i, q) in samples {
        dst.put_i32_le(i);
        dst.put_i32_le(q);
    }
}
