//! Marker-event grammar
//!
//! The stimulus process publishes `|`-delimited text markers on a string
//! stream. The decoder consumes trial boundaries; cue and rest markers are
//! recognised so that they are not mistaken for malformed input.
//!
//! ```text
//! CUE|<freq>          cue shown for the upcoming target
//! TRIAL_START|<freq>  stimulation begins, ground truth = <freq>
//! TRIAL_END|<freq>    stimulation ends, ground truth becomes absent
//! REST_START          rest period begins
//! REST_END            rest period ends
//! ```

use serde::{Deserialize, Serialize};

use crate::error::MarkerError;

/// Field separator of marker payloads
pub const FIELD_SEPARATOR: char = '|';

/// A parsed marker event.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MarkerEvent {
    /// Cue for the next target
    Cue {
        /// Announced target frequency
        frequency_hz: Option<f64>,
    },
    /// Start of a stimulation trial
    TrialStart {
        /// Ground-truth frequency, absent if the field is missing or malformed
        frequency_hz: Option<f64>,
    },
    /// End of a stimulation trial
    TrialEnd {
        /// Frequency field (tolerated, not used as ground truth)
        frequency_hz: Option<f64>,
    },
    /// Start of a rest period
    RestStart,
    /// End of a rest period
    RestEnd,
}

impl MarkerEvent {
    /// Parse a marker payload.
    ///
    /// # Errors
    ///
    /// Returns `MarkerError::Empty` for a blank payload and
    /// `MarkerError::Unrecognized` for a kind outside the grammar.
    pub fn parse(payload: &str) -> Result<Self, MarkerError> {
        let mut fields = payload.trim().split(FIELD_SEPARATOR);
        let kind = fields.next().map(str::trim).unwrap_or_default();
        if kind.is_empty() {
            return Err(MarkerError::Empty);
        }

        let frequency_hz = fields
            .next()
            .and_then(|f| f.trim().parse::<f64>().ok())
            .filter(|f| f.is_finite());

        match kind {
            "CUE" => Ok(Self::Cue { frequency_hz }),
            "TRIAL_START" => Ok(Self::TrialStart { frequency_hz }),
            "TRIAL_END" => Ok(Self::TrialEnd { frequency_hz }),
            "REST_START" => Ok(Self::RestStart),
            "REST_END" => Ok(Self::RestEnd),
            _ => Err(MarkerError::Unrecognized),
        }
    }

    /// Marker kind as it appears on the wire
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Cue { .. } => "CUE",
            Self::TrialStart { .. } => "TRIAL_START",
            Self::TrialEnd { .. } => "TRIAL_END",
            Self::RestStart => "REST_START",
            Self::RestEnd => "REST_END",
        }
    }

    /// Frequency field, if the kind carries one and it parsed
    #[must_use]
    pub const fn frequency_hz(&self) -> Option<f64> {
        match self {
            Self::Cue { frequency_hz }
            | Self::TrialStart { frequency_hz }
            | Self::TrialEnd { frequency_hz } => *frequency_hz,
            Self::RestStart | Self::RestEnd => None,
        }
    }

    /// True for events that delimit a trial (and reset trial state)
    #[must_use]
    pub const fn is_trial_boundary(&self) -> bool {
        matches!(self, Self::TrialStart { .. } | Self::TrialEnd { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trial_start() {
        assert_eq!(
            MarkerEvent::parse("TRIAL_START|12.0"),
            Ok(MarkerEvent::TrialStart { frequency_hz: Some(12.0) })
        );
        assert_eq!(
            MarkerEvent::parse("TRIAL_START|15"),
            Ok(MarkerEvent::TrialStart { frequency_hz: Some(15.0) })
        );
    }

    #[test]
    fn test_missing_frequency_is_absent_truth() {
        assert_eq!(
            MarkerEvent::parse("TRIAL_START"),
            Ok(MarkerEvent::TrialStart { frequency_hz: None })
        );
        assert_eq!(
            MarkerEvent::parse("TRIAL_START|abc"),
            Ok(MarkerEvent::TrialStart { frequency_hz: None })
        );
        assert_eq!(
            MarkerEvent::parse("TRIAL_START|NaN"),
            Ok(MarkerEvent::TrialStart { frequency_hz: None })
        );
    }

    #[test]
    fn test_parse_other_kinds() {
        assert_eq!(
            MarkerEvent::parse("TRIAL_END|10.0"),
            Ok(MarkerEvent::TrialEnd { frequency_hz: Some(10.0) })
        );
        assert_eq!(MarkerEvent::parse("CUE|20.0").map(|e| e.frequency_hz()), Ok(Some(20.0)));
        assert_eq!(MarkerEvent::parse("REST_START"), Ok(MarkerEvent::RestStart));
        assert_eq!(MarkerEvent::parse(" REST_END \n"), Ok(MarkerEvent::RestEnd));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(MarkerEvent::parse(""), Err(MarkerError::Empty));
        assert_eq!(MarkerEvent::parse("   "), Err(MarkerError::Empty));
        assert_eq!(MarkerEvent::parse("TRIAL_STARTED|12"), Err(MarkerError::Unrecognized));
    }

    #[test]
    fn test_trial_boundary() {
        assert!(MarkerEvent::TrialStart { frequency_hz: None }.is_trial_boundary());
        assert!(MarkerEvent::TrialEnd { frequency_hz: None }.is_trial_boundary());
        assert!(!MarkerEvent::RestStart.is_trial_boundary());
        assert_eq!(MarkerEvent::RestEnd.kind(), "REST_END");
    }
}
