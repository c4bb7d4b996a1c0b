//! Digital filters for SSVEP windows
//!
//! Second-order sections in transposed direct form II, a Butterworth
//! band-pass designer, and zero-phase (forward-backward) application with
//! odd-extension padding and steady-state initial conditions.

use std::f64::consts::PI;

use nalgebra::{Complex, DMatrix};

use crate::error::{FilterError, FilterResult};

/// Biquad coefficients (second-order section)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiquadCoeffs {
    /// Numerator coefficients [b0, b1, b2]
    pub b: [f64; 3],
    /// Denominator coefficients [a0=1, a1, a2]
    pub a: [f64; 3],
}

impl BiquadCoeffs {
    /// Notch at `notch_freq` with quality factor `q`
    #[must_use]
    pub fn notch(sample_rate: f64, notch_freq: f64, q: f64) -> Self {
        let omega = 2.0 * PI * notch_freq / sample_rate;
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * q);

        let norm = 1.0 / (1.0 + alpha);

        Self {
            b: [norm, -2.0 * cos_omega * norm, norm],
            a: [1.0, -2.0 * cos_omega * norm, (1.0 - alpha) * norm],
        }
    }

    /// Section with numerator `[1, 0, -1]` and the given conjugate pole pair
    fn band_pass_section(p1: Complex<f64>, p2: Complex<f64>) -> Self {
        Self {
            b: [1.0, 0.0, -1.0],
            a: [1.0, -(p1 + p2).re, (p1 * p2).re],
        }
    }

    /// DC gain `H(1)`
    fn dc_gain(&self) -> f64 {
        let den = self.a[0] + self.a[1] + self.a[2];
        if den.abs() < f64::EPSILON {
            0.0
        } else {
            (self.b[0] + self.b[1] + self.b[2]) / den
        }
    }

    /// Complex response at normalized angular frequency `omega` (rad/sample)
    fn response(&self, omega: f64) -> Complex<f64> {
        let z1 = Complex::from_polar(1.0, -omega);
        let z2 = z1 * z1;
        let num = z1 * self.b[1] + z2 * self.b[2] + self.b[0];
        let den = z1 * self.a[1] + z2 * self.a[2] + self.a[0];
        num / den
    }
}

/// Stateful second-order section (transposed direct form II)
#[derive(Clone, Debug)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    /// State: [s1, s2]
    state: [f64; 2],
}

impl Biquad {
    /// Create a new biquad section with given coefficients
    #[must_use]
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self { coeffs, state: [0.0, 0.0] }
    }

    /// Process a single sample
    pub fn filter(&mut self, input: f64) -> f64 {
        let BiquadCoeffs { b, a } = self.coeffs;
        let output = b[0] * input + self.state[0];
        self.state[0] = b[1] * input - a[1] * output + self.state[1];
        self.state[1] = b[2] * input - a[2] * output;
        output
    }

    /// Load the state the section would hold after a long constant input at
    /// `level`; returns the matching constant output.
    fn settle(&mut self, level: f64) -> f64 {
        let BiquadCoeffs { b, a } = self.coeffs;
        let output = level * self.coeffs.dc_gain();
        self.state = [output - b[0] * level, b[2] * level - a[2] * output];
        output
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.state = [0.0, 0.0];
    }
}

// ============================================================================
// Cascade
// ============================================================================

/// Cascade of second-order sections
#[derive(Clone, Debug, PartialEq)]
pub struct SosFilter {
    sections: Vec<BiquadCoeffs>,
}

impl SosFilter {
    /// Wrap a list of sections
    #[must_use]
    pub fn new(sections: Vec<BiquadCoeffs>) -> Self {
        Self { sections }
    }

    /// Single-section notch filter
    #[must_use]
    pub fn notch(sample_rate: f64, notch_freq: f64, q: f64) -> Self {
        Self::new(vec![BiquadCoeffs::notch(sample_rate, notch_freq, q)])
    }

    /// Butterworth band-pass of the given prototype order.
    ///
    /// The analog low-pass prototype is shifted to the prewarped band, then
    /// mapped through the bilinear transform. The result has `order`
    /// sections and unit gain at the band's geometric center.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidBand`] unless
    /// `0 < low_hz < high_hz < nyquist`, and [`FilterError::InvalidOrder`]
    /// for a zero order.
    pub fn butterworth_band_pass(
        order: usize,
        low_hz: f64,
        high_hz: f64,
        sample_rate: f64,
    ) -> FilterResult<Self> {
        let nyquist_hz = sample_rate / 2.0;
        if order == 0 {
            return Err(FilterError::InvalidOrder(order));
        }
        if !(low_hz > 0.0 && low_hz < high_hz && high_hz < nyquist_hz) {
            return Err(FilterError::InvalidBand { low_hz, high_hz, nyquist_hz });
        }

        let k = 2.0 * sample_rate;
        let warp = |f: f64| k * (PI * f / sample_rate).tan();
        let (w1, w2) = (warp(low_hz), warp(high_hz));
        let bandwidth = w2 - w1;
        let center_sq = w1 * w2;
        let bilinear = |s: Complex<f64>| (s + k) / (-s + k);

        let mut sections = Vec::with_capacity(order);
        for m in 0..order {
            #[allow(clippy::cast_precision_loss)]
            let theta = PI * (2 * m + order + 1) as f64 / (2 * order) as f64;
            let pole = Complex::from_polar(1.0, theta);
            if pole.im < -1e-12 {
                // Conjugate of a pole handled on the upper half
                continue;
            }

            // Each prototype pole splits into the roots of s^2 - p*B*s + W0^2
            let scaled = pole * bandwidth;
            let disc = (scaled * scaled - 4.0 * center_sq).sqrt();
            let s_plus = (scaled + disc) / 2.0;
            let s_minus = (scaled - disc) / 2.0;

            if pole.im > 1e-12 {
                for s in [s_plus, s_minus] {
                    let z = bilinear(s);
                    sections.push(BiquadCoeffs::band_pass_section(z, z.conj()));
                }
            } else {
                sections.push(BiquadCoeffs::band_pass_section(bilinear(s_plus), bilinear(s_minus)));
            }
        }

        let mut filter = Self::new(sections);
        let omega_center = 2.0 * (center_sq.sqrt() / k).atan();
        filter.normalize_gain(omega_center);
        Ok(filter)
    }

    /// Scale numerators so that `|H(omega)| == 1`
    fn normalize_gain(&mut self, omega: f64) {
        let gain = self.magnitude(omega);
        if gain > 0.0 && gain.is_finite() {
            #[allow(clippy::cast_precision_loss)]
            let per_section = gain.powf(-1.0 / self.sections.len() as f64);
            for section in &mut self.sections {
                for b in &mut section.b {
                    *b *= per_section;
                }
            }
        }
    }

    /// Magnitude response at normalized angular frequency `omega`
    #[must_use]
    pub fn magnitude(&self, omega: f64) -> f64 {
        self.sections
            .iter()
            .map(|s| s.response(omega))
            .fold(Complex::new(1.0, 0.0), |acc, h| acc * h)
            .norm()
    }

    /// Magnitude response at `freq_hz` for a stream at `sample_rate`
    #[must_use]
    pub fn magnitude_at(&self, freq_hz: f64, sample_rate: f64) -> f64 {
        self.magnitude(2.0 * PI * freq_hz / sample_rate)
    }

    /// The sections of the cascade
    #[must_use]
    pub fn sections(&self) -> &[BiquadCoeffs] {
        &self.sections
    }

    /// Run the cascade once, starting from the steady state of `level`
    fn run(&self, signal: &mut [f64]) {
        let Some(&first) = signal.first() else {
            return;
        };
        let mut stages: Vec<Biquad> = self.sections.iter().copied().map(Biquad::new).collect();
        let mut level = first;
        for stage in &mut stages {
            level = stage.settle(level);
        }
        for x in signal.iter_mut() {
            *x = stages.iter_mut().fold(*x, |acc, stage| stage.filter(acc));
        }
    }

    /// Zero-phase forward-backward filtering.
    ///
    /// The signal is padded at both ends with its odd extension
    /// (`3 * (2 * sections + 1)` samples, capped at `len - 1`) and each pass
    /// starts from the steady state of its first sample.
    #[must_use]
    pub fn filtfilt(&self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        if n == 0 || self.sections.is_empty() {
            return signal.to_vec();
        }

        let pad = (3 * (2 * self.sections.len() + 1)).min(n - 1);
        let (first, last) = (signal[0], signal[n - 1]);

        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
        ext.extend_from_slice(signal);
        ext.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));

        self.run(&mut ext);
        ext.reverse();
        self.run(&mut ext);
        ext.reverse();

        ext[pad..pad + n].to_vec()
    }

    /// Zero-phase filtering of every column of a `samples × channels` matrix
    #[must_use]
    pub fn filtfilt_columns(&self, window: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = window.clone();
        for mut column in out.column_iter_mut() {
            let raw: Vec<f64> = column.iter().copied().collect();
            for (dst, v) in column.iter_mut().zip(self.filtfilt(&raw)) {
                *dst = v;
            }
        }
        out
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FS: f64 = 250.0;

    fn sine(freq: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / FS).sin()).collect()
    }

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    #[test]
    fn test_band_pass_section_count() {
        let f = SosFilter::butterworth_band_pass(4, 10.5, 13.5, FS).unwrap();
        assert_eq!(f.sections().len(), 4);

        let odd = SosFilter::butterworth_band_pass(3, 10.5, 13.5, FS).unwrap();
        assert_eq!(odd.sections().len(), 3);
    }

    #[test]
    fn test_band_pass_unit_gain_at_center() {
        let f = SosFilter::butterworth_band_pass(4, 8.0, 14.0, FS).unwrap();
        let center = (8.0f64 * 14.0).sqrt();
        assert_relative_eq!(f.magnitude_at(center, FS), 1.0, epsilon = 1e-6);
        assert!(f.magnitude_at(40.0, FS) < 1e-3);
        assert!(f.magnitude_at(2.0, FS) < 1e-3);
    }

    #[test]
    fn test_band_pass_half_power_edges() {
        let f = SosFilter::butterworth_band_pass(4, 10.0, 14.0, FS).unwrap();
        let half_power = std::f64::consts::FRAC_1_SQRT_2;
        assert_relative_eq!(f.magnitude_at(10.0, FS), half_power, epsilon = 1e-3);
        assert_relative_eq!(f.magnitude_at(14.0, FS), half_power, epsilon = 1e-3);
    }

    #[test]
    fn test_band_pass_rejects_bad_edges() {
        assert!(SosFilter::butterworth_band_pass(4, 14.0, 8.0, FS).is_err());
        assert!(SosFilter::butterworth_band_pass(4, 0.0, 8.0, FS).is_err());
        assert!(SosFilter::butterworth_band_pass(4, 100.0, 130.0, FS).is_err());
        assert_eq!(
            SosFilter::butterworth_band_pass(0, 8.0, 14.0, FS),
            Err(FilterError::InvalidOrder(0))
        );
    }

    #[test]
    fn test_filtfilt_passes_center_and_rejects_far() {
        let f = SosFilter::butterworth_band_pass(4, 10.5, 13.5, FS).unwrap();
        let n = 1500;

        let inside = sine(12.0, n);
        let out = f.filtfilt(&inside);
        // Ignore the edge transients
        let mid = 500..n - 500;
        assert_relative_eq!(rms(&out[mid.clone()]), rms(&inside[mid.clone()]), epsilon = 0.05);

        let outside = sine(30.0, n);
        let out = f.filtfilt(&outside);
        assert!(rms(&out[mid.clone()]) < 0.01 * rms(&outside[mid]));
    }

    #[test]
    fn test_filtfilt_is_zero_phase() {
        let f = SosFilter::butterworth_band_pass(4, 10.5, 13.5, FS).unwrap();
        let x = sine(12.0, 1500);
        let y = f.filtfilt(&x);
        for i in 500..1000 {
            assert!((y[i] - x[i]).abs() < 0.05, "sample {i}: {} vs {}", y[i], x[i]);
        }
    }

    #[test]
    fn test_notch_attenuates_line_noise() {
        let f = SosFilter::notch(FS, 50.0, 30.0);
        let x = sine(50.0, 1000);
        let y = f.filtfilt(&x);
        let mid = 200..800;
        // > 20 dB
        assert!(rms(&y[mid.clone()]) < 0.1 * rms(&x[mid]));
        assert_relative_eq!(f.magnitude_at(12.0, FS), 1.0, epsilon = 0.01);
    }

    #[test]
    fn test_filtfilt_short_and_empty() {
        let f = SosFilter::notch(FS, 50.0, 30.0);
        assert!(f.filtfilt(&[]).is_empty());
        assert_eq!(f.filtfilt(&[2.5]).len(), 1);
    }

    #[test]
    fn test_biquad_settles_on_constant_input() {
        let coeffs = BiquadCoeffs::notch(FS, 50.0, 30.0);
        let mut biquad = Biquad::new(coeffs);
        let level = biquad.settle(3.0);
        for _ in 0..10 {
            assert_relative_eq!(biquad.filter(3.0), level, epsilon = 1e-12);
        }
        biquad.reset();
        assert_relative_eq!(biquad.filter(0.0), 0.0);
    }

    #[test]
    fn test_filtfilt_columns() {
        let f = SosFilter::notch(FS, 50.0, 30.0);
        let line = sine(50.0, 300);
        let m = DMatrix::from_fn(300, 2, |r, c| if c == 0 { line[r] } else { 1.0 });
        let out = f.filtfilt_columns(&m);
        assert_eq!(out.shape(), (300, 2));
        // DC passes the notch untouched
        assert_relative_eq!(out[(150, 1)], 1.0, epsilon = 1e-9);
    }
}
