//! Network stream adapters
//!
//! - [`lsl`]: Lab Streaming Layer (LSL) compatible discovery and inlets

pub mod lsl;

pub use lsl::{
    lsl_local_clock, resolve_streams, ChannelFormat, DiscoveredStream, LslInlet, StreamInfo, StreamType,
};
