//! Remote API client and IQ capture tool for baseband simulators.
//!
//! # Crate Structure
//!
//! - [`transport`]: WebSocket and in-memory message transports
//! - [`frame`]: Side-channel event framing and the raw IQ record format
//! - [`session`]: Scripted request/reply session engine
//! - [`capture`]: IQ capture orchestration and per-slot demultiplexing

/// Re-export transport types.
pub mod transport {
    pub use iqtap_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use iqtap_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use iqtap_session::*;
}

/// Re-export capture types.
pub mod capture {
    pub use iqtap_capture::*;
}
