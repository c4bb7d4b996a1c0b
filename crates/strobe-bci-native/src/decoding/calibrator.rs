//! Per-class stimulus frequency fine-tuning
//!
//! Monitors do not always flicker at exactly the nominal rate. The first time
//! a class's ground truth is seen, a small grid around the nominal frequency
//! is searched for the reference that best matches the window, and that
//! class's reference is regenerated at the winner.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use strobe_bci_core::math::constants::{REFERENCE_HARMONICS, TUNE_SPAN_HZ, TUNE_STEP_HZ};
use strobe_bci_core::class_index;
use tracing::trace;

use crate::processing::{harmonic_reference, leading_canonical_correlation};

/// A class's nominal and tuned frequency
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    /// Label frequency (Hz)
    pub nominal_hz: f64,
    /// Frequency the reference is generated at (Hz)
    pub tuned_hz: f64,
}

/// Grid search over `[nominal - span, nominal + span]`
#[derive(Clone, Debug)]
pub struct FrequencyCalibrator {
    sample_rate: f64,
    span_hz: f64,
    step_hz: f64,
}

impl FrequencyCalibrator {
    /// Calibrator with the standard ±0.2 Hz span at 0.05 Hz steps
    #[must_use]
    pub fn new(sample_rate: f64) -> Self {
        Self { sample_rate, span_hz: TUNE_SPAN_HZ, step_hz: TUNE_STEP_HZ }
    }

    /// Candidate frequencies searched around `nominal_hz`, ascending
    #[must_use]
    pub fn grid(&self, nominal_hz: f64) -> Vec<f64> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let steps = (2.0 * self.span_hz / self.step_hz).round() as usize;
        (0..=steps)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let offset = i as f64 * self.step_hz;
                (nominal_hz - self.span_hz + offset).min(nominal_hz + self.span_hz)
            })
            .collect()
    }

    /// Best-matching grid frequency for a preprocessed `window`, or `None`
    /// when every fit failed. Failed grid points are skipped.
    #[must_use]
    pub fn tune(&self, window: &DMatrix<f64>, nominal_hz: f64) -> Option<f64> {
        let mut best: Option<(f64, f64)> = None;
        for freq in self.grid(nominal_hz) {
            let reference = harmonic_reference(freq, self.sample_rate, window.nrows(), REFERENCE_HARMONICS);
            match leading_canonical_correlation(window, &reference) {
                Ok(r) if best.map_or(true, |(_, top)| r > top) => best = Some((freq, r)),
                Ok(_) => {}
                Err(err) => trace!(%err, freq, "Skipping calibration offset"),
            }
        }
        best.map(|(freq, _)| freq)
    }
}

/// Which classes have been searched and what they were tuned to.
#[derive(Clone, Debug, Default)]
pub struct CalibrationCache {
    attempted: Vec<bool>,
    tuned: Vec<Option<f64>>,
}

impl CalibrationCache {
    /// Empty cache for `classes` classes
    #[must_use]
    pub fn new(classes: usize) -> Self {
        Self { attempted: vec![false; classes], tuned: vec![None; classes] }
    }

    /// True if class `index` has not been searched yet
    #[must_use]
    pub fn needs_search(&self, index: usize) -> bool {
        self.attempted.get(index).is_some_and(|done| !done)
    }

    /// Mark class `index` as searched
    pub fn mark_attempted(&mut self, index: usize) {
        if let Some(done) = self.attempted.get_mut(index) {
            *done = true;
        }
    }

    /// Record the tuned frequency of class `index` (also marks it searched)
    pub fn record(&mut self, index: usize, tuned_hz: f64) {
        self.mark_attempted(index);
        if let Some(slot) = self.tuned.get_mut(index) {
            *slot = Some(tuned_hz);
        }
    }

    /// Tuned frequency of class `index`
    #[must_use]
    pub fn tuned(&self, index: usize) -> Option<f64> {
        self.tuned.get(index).copied().flatten()
    }

    /// Tuned classes as (nominal, tuned) pairs for the given class labels
    #[must_use]
    pub fn entries(&self, classes: &[f64]) -> Vec<CalibrationEntry> {
        classes
            .iter()
            .zip(&self.tuned)
            .filter_map(|(&nominal_hz, tuned)| tuned.map(|tuned_hz| CalibrationEntry { nominal_hz, tuned_hz }))
            .collect()
    }

    /// Seed the cache from a previous run. Entries whose nominal frequency
    /// is not a class are ignored; returns the class indices seeded.
    pub fn preload(&mut self, classes: &[f64], entries: &[CalibrationEntry]) -> Vec<usize> {
        let mut seeded = Vec::new();
        for entry in entries {
            if let Some(index) = class_index(classes, entry.nominal_hz) {
                self.record(index, entry.tuned_hz);
                seeded.push(index);
            }
        }
        seeded
    }
}
