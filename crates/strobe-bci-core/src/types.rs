//! Core data types for the SSVEP decoding pipeline
//!
//! These types carry no heap data so they can be shared between the host
//! decoder, log writers and any embedded consumer of decisions.

use core::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Scoring Method
// ============================================================================

/// Frequency scoring strategy.
///
/// Selected once when the decoder is built; both variants produce one scalar
/// per candidate frequency per window.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoringMethod {
    /// Harmonic single-band CCA: narrow-band filter per harmonic
    #[default]
    CcaPlus,
    /// Filter-bank CCA over fixed sub-bands
    Fbcca,
}

impl ScoringMethod {
    /// Identifier written into decision records
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::CcaPlus => "CCA+",
            Self::Fbcca => "FBCCA",
        }
    }

    /// Parse a method label (case-insensitive).
    ///
    /// Accepts the record labels plus the common aliases `cca`, `harmonic`
    /// and `filterbank`.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        if ["cca+", "cca", "harmonic"]
            .iter()
            .any(|alias| label.eq_ignore_ascii_case(alias))
        {
            Some(Self::CcaPlus)
        } else if ["fbcca", "filterbank", "filter-bank"]
            .iter()
            .any(|alias| label.eq_ignore_ascii_case(alias))
        {
            Some(Self::Fbcca)
        } else {
            None
        }
    }
}

impl fmt::Display for ScoringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Decoder State
// ============================================================================

/// Processing state attached to every emitted decision.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecoderState {
    /// Confident enough to emit a command
    #[default]
    Control,
    /// Confidence gate closed: no intentional command
    Idle,
}

impl DecoderState {
    /// State tag written into decision records
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Control => "CONTROL",
            Self::Idle => "IDLE",
        }
    }
}

impl fmt::Display for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Decision Flags
// ============================================================================

/// Annotation flags for one decision record.
///
/// Rendered as a `|`-joined tag string, e.g. `CORRECT|EARLY|LOCKED`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionFlags {
    /// Emitted prediction matches the ground truth
    pub correct: bool,
    /// Emitted prediction differs from the ground truth
    pub wrong: bool,
    /// Early stop fired on this window
    pub early: bool,
    /// Trial is locked (early stop already fired this trial)
    pub locked: bool,
    /// Idle gate closed on this window
    pub idle: bool,
}

impl DecisionFlags {
    /// Active tags in canonical order
    pub fn tags(self) -> impl Iterator<Item = &'static str> {
        [
            (self.correct, "CORRECT"),
            (self.wrong, "WRONG"),
            (self.early, "EARLY"),
            (self.locked, "LOCKED"),
            (self.idle, DecoderState::Idle.label()),
        ]
        .into_iter()
        .filter_map(|(set, tag)| set.then_some(tag))
    }

    /// True when no tag is set
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.tags().next().is_none()
    }
}

impl fmt::Display for DecisionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tag) in self.tags().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(tag)?;
        }
        Ok(())
    }
}

// ============================================================================
// Filter-Bank Sub-Bands
// ============================================================================

/// One sub-band of the filter-bank scorer.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubBand {
    /// Lower band edge (Hz)
    pub low_hz: f64,
    /// Upper band edge (Hz)
    pub high_hz: f64,
    /// Weight applied to this band's correlation
    pub weight: f64,
}

impl SubBand {
    /// Create a sub-band
    #[must_use]
    pub const fn new(low_hz: f64, high_hz: f64, weight: f64) -> Self {
        Self { low_hz, high_hz, weight }
    }
}

// ============================================================================
// Tests
// ============================================================================
