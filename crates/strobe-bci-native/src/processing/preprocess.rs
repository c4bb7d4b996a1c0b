//! Per-window preprocessing
//!
//! Line-noise removal with baseline subtraction, narrow-band isolation around
//! a harmonic, and fixed-edge band-pass for filter-bank scoring. All filtering
//! is zero-phase.

use nalgebra::DMatrix;
use strobe_bci_core::math::constants::{
    BAND_PASS_ORDER, MIN_BAND_EDGE_HZ, NARROW_BAND_WIDTH_HZ, NOTCH_Q, NYQUIST_GUARD_HZ,
};

use crate::error::{FilterError, FilterResult};
use crate::processing::filters::SosFilter;

/// Window preprocessor bound to one stream's sample rate.
#[derive(Clone, Debug)]
pub struct Preprocessor {
    sample_rate: f64,
    notch: Option<SosFilter>,
}

impl Preprocessor {
    /// Create a preprocessor. A `notch_hz` of zero (or below) disables the
    /// notch.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidBand`] if the notch lies at or above
    /// nyquist.
    pub fn new(sample_rate: f64, notch_hz: f64) -> FilterResult<Self> {
        let nyquist_hz = sample_rate / 2.0;
        let notch = if notch_hz > 0.0 {
            if notch_hz >= nyquist_hz || !notch_hz.is_finite() {
                return Err(FilterError::InvalidBand {
                    low_hz: notch_hz,
                    high_hz: notch_hz,
                    nyquist_hz,
                });
            }
            Some(SosFilter::notch(sample_rate, notch_hz, NOTCH_Q))
        } else {
            None
        };
        Ok(Self { sample_rate, notch })
    }

    /// Stream sample rate (Hz)
    #[must_use]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Nyquist frequency (Hz)
    #[must_use]
    pub fn nyquist_hz(&self) -> f64 {
        self.sample_rate / 2.0
    }

    /// True when a notch is configured
    #[must_use]
    pub fn has_notch(&self) -> bool {
        self.notch.is_some()
    }

    /// Notch each channel (when configured), then subtract each channel's mean.
    #[must_use]
    pub fn remove_line_noise(&self, window: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = match &self.notch {
            Some(notch) => notch.filtfilt_columns(window),
            None => window.clone(),
        };
        for mut column in out.column_iter_mut() {
            let mean = column.mean();
            column.add_scalar_mut(-mean);
        }
        out
    }

    /// Band edges of the narrow band around `center_hz`, clamped to
    /// `[1 Hz, nyquist - 1 Hz]`.
    #[must_use]
    pub fn narrow_band_edges(&self, center_hz: f64) -> (f64, f64) {
        let half = NARROW_BAND_WIDTH_HZ / 2.0;
        let low = (center_hz - half).max(MIN_BAND_EDGE_HZ);
        let high = (center_hz + half).min(self.nyquist_hz() - NYQUIST_GUARD_HZ);
        (low, high)
    }

    /// Zero-phase band-pass of width 3 Hz around `center_hz`.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidBand`] when clamping leaves an empty
    /// band (the harmonic sits above the usable range).
    pub fn narrow_band(&self, window: &DMatrix<f64>, center_hz: f64) -> FilterResult<DMatrix<f64>> {
        let (low, high) = self.narrow_band_edges(center_hz);
        self.band_pass(window, low, high)
    }

    /// Zero-phase band-pass with fixed edges.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidBand`] unless `0 < low < high < nyquist`.
    pub fn band_pass(&self, window: &DMatrix<f64>, low_hz: f64, high_hz: f64) -> FilterResult<DMatrix<f64>> {
        let filter = self.design_band_pass(low_hz, high_hz)?;
        Ok(filter.filtfilt_columns(window))
    }

    /// Design the band-pass used by [`band_pass`](Self::band_pass)
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidBand`] unless `0 < low < high < nyquist`.
    pub fn design_band_pass(&self, low_hz: f64, high_hz: f64) -> FilterResult<SosFilter> {
        SosFilter::butterworth_band_pass(BAND_PASS_ORDER, low_hz, high_hz, self.sample_rate)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    const FS: f64 = 250.0;

    fn two_tone(n: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, 2, |r, c| {
            let t = r as f64 / FS;
            5.0 + c as f64 + (2.0 * PI * 12.0 * t).sin() + 2.0 * (2.0 * PI * 50.0 * t).sin()
        })
    }

    #[test]
    fn test_baseline_removed() {
        let pre = Preprocessor::new(FS, 0.0).unwrap();
        assert!(!pre.has_notch());
        let out = pre.remove_line_noise(&two_tone(375));
        for column in out.column_iter() {
            assert_relative_eq!(column.mean(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_notch_removes_line_component() {
        let pre = Preprocessor::new(FS, 50.0).unwrap();
        let x = two_tone(1500);
        let y = pre.remove_line_noise(&x);
        // Residual after removing the 12 Hz tone and the offset
        let residual: f64 = (500..1000)
            .map(|r| {
                let t = r as f64 / FS;
                (y[(r, 0)] - (2.0 * PI * 12.0 * t).sin()).powi(2)
            })
            .sum::<f64>()
            / 500.0;
        assert!(residual.sqrt() < 0.1, "residual rms {}", residual.sqrt());
    }

    #[test]
    fn test_notch_above_nyquist_rejected() {
        assert!(Preprocessor::new(80.0, 50.0).is_err());
    }

    #[test]
    fn test_narrow_band_edges_clamped() {
        let pre = Preprocessor::new(FS, 50.0).unwrap();
        assert_eq!(pre.narrow_band_edges(12.0), (10.5, 13.5));
        assert_eq!(pre.narrow_band_edges(1.5), (1.0, 3.0));
        assert_eq!(pre.narrow_band_edges(124.0), (122.5, 124.0));
        assert!(pre.narrow_band(&two_tone(375), 130.0).is_err());
    }

    #[test]
    fn test_narrow_band_isolates_tone() {
        let pre = Preprocessor::new(FS, 50.0).unwrap();
        let clean = pre.remove_line_noise(&two_tone(1500));
        let out = pre.narrow_band(&clean, 12.0).unwrap();
        assert_eq!(out.shape(), (1500, 2));
        let peak = (500..1000).map(|r| out[(r, 0)].abs()).fold(0.0, f64::max);
        assert_relative_eq!(peak, 1.0, epsilon = 0.05);
    }
}
