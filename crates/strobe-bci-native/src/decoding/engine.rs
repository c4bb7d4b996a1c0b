//! Per-window decision state machine
//!
//! Turns one window's ranking into an emitted decision:
//!
//! 1. Idle gate: a weak or ambiguous window is tagged `IDLE`, emits no
//!    prediction and is kept out of the vote history.
//! 2. Voting: otherwise the raw winner joins the history and the majority
//!    label is emitted.
//! 3. Early stop: with markers and a known trial start, a persistent and
//!    confident raw winner locks the trial once.
//!
//! Locking only annotates the output. Scoring and emission carry on for the
//! rest of the trial, so consumers that want a frozen answer must read
//! `locked_prediction` from the trial state themselves.

use strobe_bci_core::{same_frequency, DecisionFlags, DecoderState, EarlyStopConfig, IdleGateConfig};
use tracing::info;

use super::trial::SessionState;

/// Scores of one window, reduced to what the state machine needs
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowScore {
    /// Arg-max class frequency
    pub raw_prediction_hz: f64,
    /// Best score
    pub r1: f64,
    /// Second-best score
    pub r2: f64,
    /// `r1 - r2`
    pub margin: f64,
}

/// The engine's verdict for one window
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decision {
    /// Processing state of this window
    pub state: DecoderState,
    /// Voted prediction; absent when idle
    pub prediction_hz: Option<f64>,
    /// Unvoted arg-max prediction
    pub raw_prediction_hz: f64,
    /// Best score
    pub r1: f64,
    /// Second-best score
    pub r2: f64,
    /// `r1 - r2`
    pub margin: f64,
    /// Early stop fired on this window
    pub early: bool,
    /// Trial is locked after this window
    pub locked: bool,
    /// Output annotation
    pub flags: DecisionFlags,
}

/// Idle gating, voting and early stopping.
#[derive(Clone, Debug)]
pub struct DecisionEngine {
    idle: IdleGateConfig,
    early_stop: EarlyStopConfig,
    markers_available: bool,
}

impl DecisionEngine {
    /// Create an engine. Early stop stays inactive without a marker stream.
    #[must_use]
    pub fn new(idle: IdleGateConfig, early_stop: EarlyStopConfig, markers_available: bool) -> Self {
        Self { idle, early_stop, markers_available }
    }

    /// True when early stop can fire in this run
    #[must_use]
    pub fn early_stop_active(&self) -> bool {
        self.early_stop.enabled && self.markers_available
    }

    /// Marker stream went away mid-run; early stop stays off from here on
    pub fn markers_lost(&mut self) {
        self.markers_available = false;
    }

    /// Decide one window at prediction time `now`.
    pub fn decide(&self, session: &mut SessionState, score: &WindowScore, now: f64) -> Decision {
        let WindowScore { raw_prediction_hz, r1, r2, margin } = *score;

        let idle = self.idle.is_idle(r1, margin);
        let prediction_hz = if idle {
            None
        } else {
            session.votes.push(raw_prediction_hz);
            session.votes.majority().or(Some(raw_prediction_hz))
        };

        let mut early = false;
        let trial = &mut session.trial;
        if self.early_stop_active() && !trial.locked {
            if let Some(elapsed) = trial.elapsed(now) {
                let consecutive = trial.observe(raw_prediction_hz);
                if self.early_stop.criteria_met(elapsed, r1, margin, consecutive) {
                    early = trial.lock(raw_prediction_hz, now);
                    info!(
                        prediction_hz = raw_prediction_hz,
                        elapsed_s = elapsed,
                        consecutive,
                        "Early stop locked trial"
                    );
                }
            }
        }
        let locked = trial.locked;

        let verdict = match (prediction_hz, trial.truth_hz) {
            (Some(pred), Some(truth)) => Some(same_frequency(pred, truth)),
            _ => None,
        };

        let flags = DecisionFlags {
            correct: verdict == Some(true),
            wrong: verdict == Some(false),
            early,
            locked,
            idle,
        };

        Decision {
            state: if idle { DecoderState::Idle } else { DecoderState::Control },
            prediction_hz,
            raw_prediction_hz,
            r1,
            r2,
            margin,
            early,
            locked,
            flags,
        }
    }
}
