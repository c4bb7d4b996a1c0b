//! Strobe BCI Native - Host-side online SSVEP decoding
//!
//! This crate turns a live multichannel EEG stream into frequency-class
//! decisions:
//! - Circular buffering of incoming samples
//! - Zero-phase notch and band-pass filtering
//! - Canonical correlation scoring against harmonic references
//! - Idle gating, majority voting and early stopping
//! - Decision logging and run metadata
//!
//! # Modules
//!
//! - [`bridge`]: Sample and marker feeds (LSL inlets, synthetic source)
//! - [`processing`]: Buffering, filtering, references and CCA
//! - [`decoding`]: Scorers, calibration, trial state and the decision engine
//! - [`pipeline`]: The online decoding loop
//! - [`recorder`]: CSV decision log and per-run `.meta.json`
//! - [`config`]: Run configuration
//! - [`error`]: Error types

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod bridge;
pub mod config;
pub mod decoding;
pub mod error;
pub mod pipeline;
pub mod processing;
pub mod recorder;

// Re-export key types
pub use config::{ChannelSelection, PipelineConfig};
pub use decoding::{DecisionEngine, FrequencyScorer, SessionState};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{OnlineDecoder, PipelineStats};
pub use recorder::{DecisionRecord, DecisionRecorder, RunMetadata};
