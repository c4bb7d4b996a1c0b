//! Decoding constants and allocation-free decision helpers
//!
//! The helpers here operate on plain slices so they can be used from the
//! host decoder and from `no_std` consumers alike.

// ============================================================================
// Constants
// ============================================================================

/// Fixed parameters of the SSVEP scoring and calibration stages
pub mod constants {
    use crate::types::SubBand;

    /// Number of harmonics in each reference matrix
    pub const REFERENCE_HARMONICS: usize = 3;

    /// Per-harmonic weights of the harmonic single-band scorer
    pub const HARMONIC_WEIGHTS: [f64; REFERENCE_HARMONICS] = [1.0, 0.6, 0.4];

    /// Sub-bands of the filter-bank scorer (low, high, weight)
    pub const FILTER_BANK: [SubBand; 4] = [
        SubBand::new(8.0, 14.0, 1.0),
        SubBand::new(14.0, 20.0, 0.8),
        SubBand::new(20.0, 26.0, 0.6),
        SubBand::new(26.0, 32.0, 0.4),
    ];

    /// Width of the narrow band around each harmonic (Hz)
    pub const NARROW_BAND_WIDTH_HZ: f64 = 3.0;

    /// Butterworth prototype order for band-pass filters
    pub const BAND_PASS_ORDER: usize = 4;

    /// Quality factor of the line-noise notch
    pub const NOTCH_Q: f64 = 30.0;

    /// Lowest band-pass edge (Hz)
    pub const MIN_BAND_EDGE_HZ: f64 = 1.0;

    /// Guard between the highest band-pass edge and Nyquist (Hz)
    pub const NYQUIST_GUARD_HZ: f64 = 1.0;

    /// Half-width of the fine-tune search around a nominal frequency (Hz)
    pub const TUNE_SPAN_HZ: f64 = 0.2;

    /// Fine-tune grid step (Hz)
    pub const TUNE_STEP_HZ: f64 = 0.05;

    /// Two frequencies closer than this are the same class label
    pub const LABEL_TOLERANCE_HZ: f64 = 1e-6;
}

// ============================================================================
// Label Helpers
// ============================================================================

/// True when two frequency labels denote the same class.
#[inline]
#[must_use]
pub fn same_frequency(a: f64, b: f64) -> bool {
    let d = a - b;
    d < constants::LABEL_TOLERANCE_HZ && d > -constants::LABEL_TOLERANCE_HZ
}

/// Majority vote over a history of raw predictions.
///
/// Returns the label with strictly the highest count. Among tied maxima the
/// numerically smallest label wins, so the result never depends on history
/// order. Returns `None` for an empty history.
#[must_use]
pub fn majority_vote(history: &[f64]) -> Option<f64> {
    let mut best: Option<(f64, usize)> = None;

    for &candidate in history {
        let count = history.iter().filter(|&&v| same_frequency(v, candidate)).count();
        best = match best {
            Some((label, n)) if n > count || (n == count && label <= candidate) => Some((label, n)),
            _ => Some((candidate, count)),
        };
    }

    best.map(|(label, _)| label)
}

/// Index of the class label matching `frequency`, if any.
#[must_use]
pub fn class_index(classes: &[f64], frequency: f64) -> Option<usize> {
    classes.iter().position(|&c| same_frequency(c, frequency))
}

// ============================================================================
// Tests
// ============================================================================
