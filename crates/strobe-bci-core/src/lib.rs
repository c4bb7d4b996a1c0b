//! Strobe BCI Core - `no_std` compatible types for SSVEP decoding
//!
//! This crate provides the foundational types shared by every layer of the
//! Strobe online decoder. It is designed to work in `no_std` environments as
//! well as `std` environments, so the same marker grammar and decision
//! primitives can run next to the acquisition front end.
//!
//! # Modules
//!
//! - [`types`]: Scoring methods, decoder states, decision flags, sub-bands
//! - [`config`]: Idle gate, early stop and vote-reset parameters
//! - [`error`]: Error types for marker parsing and parameter validation
//! - [`math`]: Constants and allocation-free decision helpers
//! - [`protocol`]: Marker-event grammar emitted by the stimulus process
//!
//! # Features
//!
//! - `std`: Enable standard library support
//!
//! # Example
//!
//! ```rust
//! use strobe_bci_core::protocol::MarkerEvent;
//!
//! let event = MarkerEvent::parse("TRIAL_START|12.0").unwrap();
//! assert_eq!(event, MarkerEvent::TrialStart { frequency_hz: Some(12.0) });
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

#[cfg(feature = "std")]
extern crate std;

pub mod config;
pub mod error;
pub mod math;
pub mod protocol;
pub mod types;

// Re-export commonly used types at crate root
pub use config::{EarlyStopConfig, IdleGateConfig, VoteResetPolicy};
pub use error::{MarkerError, ParameterError};
pub use math::{class_index, majority_vote, same_frequency};
pub use protocol::MarkerEvent;
pub use types::{DecisionFlags, DecoderState, ScoringMethod, SubBand};
