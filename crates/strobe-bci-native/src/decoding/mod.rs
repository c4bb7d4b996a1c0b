//! SSVEP decoding
//!
//! - [`scorer`]: Per-candidate correlation scoring (harmonic and filter bank)
//! - [`calibrator`]: Per-class frequency fine-tuning
//! - [`trial`]: Trial state, vote history and the session aggregate
//! - [`engine`]: Idle gate, voting and early-stop state machine

pub mod calibrator;
pub mod engine;
pub mod scorer;
pub mod trial;

pub use calibrator::{CalibrationCache, CalibrationEntry, FrequencyCalibrator};
pub use engine::{Decision, DecisionEngine, WindowScore};
pub use scorer::{scorer_for, FilterBankScorer, FrequencyScorer, HarmonicScorer, Ranking, ScoreVector};
pub use trial::{SessionState, TrialState, VoteHistory};
