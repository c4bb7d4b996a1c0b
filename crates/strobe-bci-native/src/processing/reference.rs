//! Harmonic sine/cosine reference signals

use std::f64::consts::PI;

use nalgebra::DMatrix;
use strobe_bci_core::math::constants::REFERENCE_HARMONICS;
use strobe_bci_core::same_frequency;

/// Build an `n_samples × 2 * harmonics` reference for `frequency_hz`.
///
/// Columns come in (sin, cos) pairs per harmonic, fundamental first.
#[must_use]
pub fn harmonic_reference(
    frequency_hz: f64,
    sample_rate: f64,
    n_samples: usize,
    harmonics: usize,
) -> DMatrix<f64> {
    DMatrix::from_fn(n_samples, 2 * harmonics, |r, c| {
        #[allow(clippy::cast_precision_loss)]
        let phase = 2.0 * PI * (c / 2 + 1) as f64 * frequency_hz * r as f64 / sample_rate;
        if c % 2 == 0 {
            phase.sin()
        } else {
            phase.cos()
        }
    })
}

/// Reference for one candidate class.
#[derive(Clone, Debug)]
pub struct ReferenceEntry {
    /// Stimulus frequency the class is labelled with (Hz)
    pub nominal_hz: f64,
    /// Frequency the reference is generated at (Hz)
    pub tuned_hz: f64,
    /// Harmonic reference matrix
    pub matrix: DMatrix<f64>,
}

impl ReferenceEntry {
    /// The (sin, cos) pair of harmonic `h` (1-based)
    #[must_use]
    pub fn harmonic(&self, h: usize) -> DMatrix<f64> {
        self.matrix.columns(2 * (h - 1), 2).clone_owned()
    }

    /// True once the entry has been re-tuned away from its label
    #[must_use]
    pub fn is_tuned(&self) -> bool {
        !same_frequency(self.tuned_hz, self.nominal_hz)
    }
}

/// Harmonic references for every candidate class, sampled over one window.
#[derive(Clone, Debug)]
pub struct ReferenceSet {
    sample_rate: f64,
    n_samples: usize,
    entries: Vec<ReferenceEntry>,
}

impl ReferenceSet {
    /// Build references at the nominal frequencies
    #[must_use]
    pub fn new(frequencies: &[f64], sample_rate: f64, n_samples: usize) -> Self {
        let entries = frequencies
            .iter()
            .map(|&f| ReferenceEntry {
                nominal_hz: f,
                tuned_hz: f,
                matrix: harmonic_reference(f, sample_rate, n_samples, REFERENCE_HARMONICS),
            })
            .collect();
        Self { sample_rate, n_samples, entries }
    }

    /// Number of classes
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no classes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for class `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ReferenceEntry> {
        self.entries.get(index)
    }

    /// All entries in class order
    pub fn iter(&self) -> impl Iterator<Item = &ReferenceEntry> {
        self.entries.iter()
    }

    /// Nominal class frequencies in class order
    #[must_use]
    pub fn nominal_frequencies(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.nominal_hz).collect()
    }

    /// Regenerate class `index` at `tuned_hz`. Returns false for an unknown
    /// class.
    pub fn retune(&mut self, index: usize, tuned_hz: f64) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        entry.tuned_hz = tuned_hz;
        entry.matrix = harmonic_reference(tuned_hz, self.sample_rate, self.n_samples, REFERENCE_HARMONICS);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reference_layout() {
        let y = harmonic_reference(10.0, 250.0, 100, 3);
        assert_eq!(y.shape(), (100, 6));
        assert_relative_eq!(y[(0, 0)], 0.0);
        assert_relative_eq!(y[(0, 1)], 1.0);
        assert_relative_eq!(y[(6, 0)], (2.0 * PI * 10.0 * 6.0 / 250.0).sin(), epsilon = 1e-12);
        // Second harmonic column
        assert_relative_eq!(y[(3, 2)], (2.0 * PI * 20.0 * 3.0 / 250.0).sin(), epsilon = 1e-12);
    }

    #[test]
    fn test_retune_regenerates_single_entry() {
        let mut set = ReferenceSet::new(&[10.0, 12.0], 250.0, 50);
        let before = set.get(0).unwrap().matrix.clone();
        assert!(set.retune(1, 12.1));
        assert!(!set.retune(5, 1.0));

        assert_eq!(set.get(0).unwrap().matrix, before);
        let tuned = set.get(1).unwrap();
        assert!(tuned.is_tuned());
        assert_relative_eq!(tuned.nominal_hz, 12.0);
        assert_relative_eq!(tuned.matrix[(7, 0)], (2.0 * PI * 12.1 * 7.0 / 250.0).sin(), epsilon = 1e-12);
        assert_eq!(set.nominal_frequencies(), vec![10.0, 12.0]);
    }

    #[test]
    fn test_harmonic_pair() {
        let set = ReferenceSet::new(&[15.0], 250.0, 20);
        let pair = set.get(0).unwrap().harmonic(2);
        assert_eq!(pair.shape(), (20, 2));
        assert_relative_eq!(pair[(4, 1)], (2.0 * PI * 30.0 * 4.0 / 250.0).cos(), epsilon = 1e-12);
    }
}
