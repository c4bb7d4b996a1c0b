//! Decision-stage parameters
//!
//! Idle gating, early stopping and vote-history reset policy. These are plain
//! values so they can be embedded in the host configuration and persisted in
//! run metadata unchanged.

use serde::{Deserialize, Serialize};

use crate::error::ParameterError;

// ============================================================================
// Idle Gate
// ============================================================================

/// Confidence gate that suppresses output when the best score is weak or
/// not clearly separated from the runner-up.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleGateConfig {
    /// Enable the gate
    pub enabled: bool,
    /// Minimum best score (`r1`) to leave idle
    pub r_min: f64,
    /// Minimum `r1 - r2` margin to leave idle
    pub margin: f64,
}

impl Default for IdleGateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            r_min: 0.5,
            margin: 0.05,
        }
    }
}

impl IdleGateConfig {
    /// True when a window with these scores must be reported idle
    #[inline]
    #[must_use]
    pub fn is_idle(&self, r1: f64, margin: f64) -> bool {
        self.enabled && (r1 < self.r_min || margin < self.margin)
    }

    /// Validate the thresholds.
    ///
    /// # Errors
    ///
    /// Returns a `ParameterError` if a threshold is not finite or negative.
    pub fn validate(&self) -> Result<(), ParameterError> {
        if !self.r_min.is_finite() || self.r_min < 0.0 {
            return Err(ParameterError::new("idle.r_min", "must be finite and >= 0"));
        }
        if !self.margin.is_finite() || self.margin < 0.0 {
            return Err(ParameterError::new("idle.margin", "must be finite and >= 0"));
        }
        Ok(())
    }
}

// ============================================================================
// Early Stop
// ============================================================================

/// Criteria for committing to a decision before the trial ends.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStopConfig {
    /// Enable early stopping (requires a marker stream)
    pub enabled: bool,
    /// Minimum best score
    pub r_min: f64,
    /// Minimum `r1 - r2` margin
    pub margin_min: f64,
    /// Consecutive windows with the same raw winner
    pub patience: u32,
    /// Minimum time since trial start (seconds)
    pub min_window_s: f64,
}

impl Default for EarlyStopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            r_min: 0.6,
            margin_min: 0.1,
            patience: 3,
            min_window_s: 0.5,
        }
    }
}

impl EarlyStopConfig {
    /// True when all lock criteria hold for the current window
    #[must_use]
    pub fn criteria_met(&self, elapsed_s: f64, r1: f64, margin: f64, consecutive: u32) -> bool {
        elapsed_s >= self.min_window_s
            && r1 >= self.r_min
            && margin >= self.margin_min
            && consecutive >= self.patience
    }

    /// Validate the thresholds.
    ///
    /// # Errors
    ///
    /// Returns a `ParameterError` if a threshold is not finite, negative, or
    /// patience is zero.
    pub fn validate(&self) -> Result<(), ParameterError> {
        if !self.r_min.is_finite() || self.r_min < 0.0 {
            return Err(ParameterError::new("early_stop.r_min", "must be finite and >= 0"));
        }
        if !self.margin_min.is_finite() || self.margin_min < 0.0 {
            return Err(ParameterError::new("early_stop.margin_min", "must be finite and >= 0"));
        }
        if self.patience == 0 {
            return Err(ParameterError::new("early_stop.patience", "must be at least 1"));
        }
        if !self.min_window_s.is_finite() || self.min_window_s < 0.0 {
            return Err(ParameterError::new("early_stop.min_window_s", "must be finite and >= 0"));
        }
        Ok(())
    }
}

// ============================================================================
// Vote Reset Policy
// ============================================================================

/// Whether the vote history is cleared at trial boundaries.
///
/// `Never` keeps votes across trials, so the first windows of a new trial are
/// still influenced by the previous trial's winners. Trial lock state is reset
/// on every boundary regardless of this policy.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteResetPolicy {
    /// Keep the vote history across trial boundaries
    #[default]
    Never,
    /// Clear the vote history on every `TRIAL_START` and `TRIAL_END`
    OnTrialBoundary,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_gate_disabled_never_idle() {
        let gate = IdleGateConfig::default();
        assert!(!gate.is_idle(0.0, 0.0));
    }

    #[test]
    fn test_idle_gate_thresholds() {
        let gate = IdleGateConfig { enabled: true, r_min: 0.5, margin: 0.1 };
        assert!(gate.is_idle(0.49, 0.5));
        assert!(gate.is_idle(0.9, 0.05));
        assert!(!gate.is_idle(0.5, 0.1));
    }

    #[test]
    fn test_early_stop_criteria() {
        let es = EarlyStopConfig { enabled: true, ..Default::default() };
        assert!(es.criteria_met(0.6, 0.7, 0.2, 3));
        assert!(!es.criteria_met(0.4, 0.7, 0.2, 3));
        assert!(!es.criteria_met(0.6, 0.5, 0.2, 3));
        assert!(!es.criteria_met(0.6, 0.7, 0.05, 3));
        assert!(!es.criteria_met(0.6, 0.7, 0.2, 2));
    }

    #[test]
    fn test_validation() {
        assert!(IdleGateConfig::default().validate().is_ok());
        assert!(EarlyStopConfig::default().validate().is_ok());

        let bad = EarlyStopConfig { patience: 0, ..Default::default() };
        assert_eq!(bad.validate().unwrap_err().parameter, "early_stop.patience");

        let bad = IdleGateConfig { r_min: f64::NAN, ..Default::default() };
        assert_eq!(bad.validate().unwrap_err().parameter, "idle.r_min");
    }
}
