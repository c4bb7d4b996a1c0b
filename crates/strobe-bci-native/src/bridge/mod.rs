//! Sample and marker feeds
//!
//! - [`source`]: The pull traits the pipeline consumes
//! - [`streaming`]: LSL-compatible network inlets
//! - [`synthetic`]: Seeded SSVEP generator and scripted markers for simulation
//!
//! ```rust,ignore
//! use strobe_bci_native::bridge::{LslInlet, StreamType};
//!
//! let eeg = LslInlet::resolve_and_connect(StreamType::Eeg, Duration::from_secs(5))?;
//! let markers = LslInlet::resolve_and_connect(StreamType::Markers, Duration::from_secs(2)).ok();
//! ```

pub mod source;
pub mod streaming;
pub mod synthetic;

pub use source::{MarkerSource, SampleSource};
pub use streaming::{lsl_local_clock, resolve_streams, DiscoveredStream, LslInlet, StreamInfo, StreamType};
pub use synthetic::{ScriptedMarkers, Stimulus, SyntheticConfig, SyntheticSource, TrialSchedule};
