//! Binary formats spoken by the baseband simulator.
//!
//! Two formats live here:
//! - Side-channel event frames: a 4-byte length, a JSON header carrying a
//!   label, a 4-byte length, and a payload closed by a `{type, length}`
//!   trailer. [`EventAssembler`] reassembles them from arbitrary chunks and
//!   [`EventSinks`] records them to files by label.
//! - Raw IQ capture records (see [`record`]).

pub mod assembler;
pub mod codec;
pub mod error;
pub mod record;
pub mod sink;

pub use assembler::EventAssembler;
pub use codec::{
    decode_event, encode_event, BinaryEvent, EventCodec, EventHeader, Trailer, DEFAULT_MAX_FRAME,
    TRAILER_SIZE,
};
pub use error::{FrameError, Result};
pub use record::{encode_record, RecordHeader, RECORD_HEADER_SIZE, SAMPLE_SIZE};
pub use sink::{EventSinks, ALL_LABELS};
