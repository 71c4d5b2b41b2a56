//! IQ sample capture for the baseband simulator.
//!
//! [`run_capture`] asks the server to dump raw TX/RX samples to files,
//! fetches the cell configuration, writes one JSON descriptor per RF port
//! and splits every raw file into per-slot files with [`demux_file`].

pub mod capture;
pub mod demux;
pub mod error;
pub mod port;

pub use capture::{
    prepare_output_dir, run_capture, CaptureConfig, CaptureReply, CaptureReport, PortReport,
    DEFAULT_DURATION_MS, REPLY_MARGIN,
};
pub use demux::{
    demux_file, DemuxConfig, FileReport, SlotCoordinate, SlotTiming, DEFAULT_BUFFER_SIZE,
};
pub use error::{CaptureError, DemuxError, Overflow, Result};
pub use port::{matching_cells, RfPort, CELL_TABLES};
