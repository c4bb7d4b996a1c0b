//! Correlation-based frequency scoring
//!
//! Two interchangeable strategies behind [`FrequencyScorer`]:
//! - [`HarmonicScorer`] isolates each harmonic with a narrow band and
//!   correlates it against that harmonic's (sin, cos) pair.
//! - [`FilterBankScorer`] splits the window into fixed sub-bands and
//!   correlates each against the full harmonic reference.
//!
//! Both return a weighted sum of non-negative correlations per candidate.

use nalgebra::DMatrix;
use strobe_bci_core::math::constants::{FILTER_BANK, HARMONIC_WEIGHTS, NYQUIST_GUARD_HZ};
use strobe_bci_core::{ScoringMethod, SubBand};
use tracing::{debug, trace};

use crate::error::CcaResult;
use crate::processing::{leading_canonical_correlation, Preprocessor, ReferenceEntry, ReferenceSet, SosFilter};

/// Scores one preprocessed window against one candidate class.
pub trait FrequencyScorer: Send {
    /// Method identifier written to the decision output
    fn method(&self) -> ScoringMethod;

    /// Weighted correlation score of `window` against `candidate`.
    ///
    /// # Errors
    ///
    /// Returns a [`CcaError`](crate::error::CcaError) when a correlation fit
    /// fails. The caller treats the candidate as unscored for this window.
    fn score(&self, window: &DMatrix<f64>, candidate: &ReferenceEntry) -> CcaResult<f64>;
}

/// Build the scorer for `method`
#[must_use]
pub fn scorer_for(method: ScoringMethod, preprocessor: &Preprocessor) -> Box<dyn FrequencyScorer> {
    match method {
        ScoringMethod::CcaPlus => Box::new(HarmonicScorer::new(preprocessor.clone())),
        ScoringMethod::Fbcca => Box::new(FilterBankScorer::new(preprocessor)),
    }
}

// ============================================================================
// Harmonic single-band scorer
// ============================================================================

/// Narrow-band per-harmonic scorer (`CCA+`)
#[derive(Clone, Debug)]
pub struct HarmonicScorer {
    preprocessor: Preprocessor,
}

impl HarmonicScorer {
    /// Create a scorer filtering with `preprocessor`
    #[must_use]
    pub fn new(preprocessor: Preprocessor) -> Self {
        Self { preprocessor }
    }
}

impl FrequencyScorer for HarmonicScorer {
    fn method(&self) -> ScoringMethod {
        ScoringMethod::CcaPlus
    }

    fn score(&self, window: &DMatrix<f64>, candidate: &ReferenceEntry) -> CcaResult<f64> {
        let mut total = 0.0;
        for (i, weight) in HARMONIC_WEIGHTS.iter().enumerate() {
            let h = i + 1;
            #[allow(clippy::cast_precision_loss)]
            let center = h as f64 * candidate.nominal_hz;
            // Harmonics above the usable band contribute nothing
            let band = match self.preprocessor.narrow_band(window, center) {
                Ok(band) => band,
                Err(err) => {
                    trace!(%err, harmonic = h, "Skipping harmonic");
                    continue;
                }
            };
            let r = leading_canonical_correlation(&band, &candidate.harmonic(h))?;
            total += weight * r.max(0.0);
        }
        Ok(total)
    }
}

// ============================================================================
// Filter-bank scorer
// ============================================================================

/// Fixed sub-band scorer (`FBCCA`)
#[derive(Clone, Debug)]
pub struct FilterBankScorer {
    bands: Vec<(SubBand, SosFilter)>,
}

impl FilterBankScorer {
    /// Design the sub-band filters for the preprocessor's sample rate.
    ///
    /// Upper edges are clamped below nyquist; bands left empty are dropped.
    #[must_use]
    pub fn new(preprocessor: &Preprocessor) -> Self {
        let ceiling = preprocessor.nyquist_hz() - NYQUIST_GUARD_HZ;
        let bands = FILTER_BANK
            .iter()
            .filter_map(|band| {
                let high = band.high_hz.min(ceiling);
                match preprocessor.design_band_pass(band.low_hz, high) {
                    Ok(filter) => Some((SubBand::new(band.low_hz, high, band.weight), filter)),
                    Err(err) => {
                        debug!(%err, "Dropping filter-bank band");
                        None
                    }
                }
            })
            .collect();
        Self { bands }
    }

    /// Sub-bands in use
    pub fn bands(&self) -> impl Iterator<Item = &SubBand> {
        self.bands.iter().map(|(band, _)| band)
    }
}

impl FrequencyScorer for FilterBankScorer {
    fn method(&self) -> ScoringMethod {
        ScoringMethod::Fbcca
    }

    fn score(&self, window: &DMatrix<f64>, candidate: &ReferenceEntry) -> CcaResult<f64> {
        let mut total = 0.0;
        for (band, filter) in &self.bands {
            let filtered = filter.filtfilt_columns(window);
            let r = leading_canonical_correlation(&filtered, &candidate.matrix)?;
            total += band.weight * r.max(0.0);
        }
        Ok(total)
    }
}

// ============================================================================
// Score vector
// ============================================================================

/// Best and runner-up of one window
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ranking {
    /// Class index of the best score
    pub best: usize,
    /// Best score
    pub r1: f64,
    /// Second-best score (0 with a single scored class)
    pub r2: f64,
    /// `r1 - r2`
    pub margin: f64,
}

/// Per-class scores of one window; `None` marks a failed fit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScoreVector {
    scores: Vec<Option<f64>>,
}

impl ScoreVector {
    /// Wrap precomputed scores
    #[must_use]
    pub fn from_scores(scores: Vec<Option<f64>>) -> Self {
        Self { scores }
    }

    /// Score every class of `references`. Failed fits are logged at debug
    /// and left unscored.
    #[must_use]
    pub fn compute(scorer: &dyn FrequencyScorer, window: &DMatrix<f64>, references: &ReferenceSet) -> Self {
        let scores = references
            .iter()
            .map(|entry| match scorer.score(window, entry) {
                Ok(score) => Some(score),
                Err(err) => {
                    debug!(%err, candidate_hz = entry.nominal_hz, "Candidate scoring failed");
                    None
                }
            })
            .collect();
        Self { scores }
    }

    /// Score of class `index`, if it was scored
    #[must_use]
    pub fn get(&self, index: usize) -> Option<f64> {
        self.scores.get(index).copied().flatten()
    }

    /// Number of classes
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// True when there are no classes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Number of classes whose fit failed
    #[must_use]
    pub fn failures(&self) -> usize {
        self.scores.iter().filter(|s| s.is_none()).count()
    }

    /// Best and second-best scored classes. Ties go to the lower class
    /// index. `None` when no class was scored.
    #[must_use]
    pub fn rank(&self) -> Option<Ranking> {
        let mut best: Option<(usize, f64)> = None;
        let mut second = 0.0_f64;
        for (i, score) in self.scores.iter().enumerate() {
            let Some(score) = *score else { continue };
            match best {
                Some((_, top)) if score <= top => second = second.max(score),
                Some((_, top)) => {
                    second = second.max(top);
                    best = Some((i, score));
                }
                None => best = Some((i, score)),
            }
        }
        best.map(|(best, r1)| Ranking { best, r1, r2: second, margin: r1 - second })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};
    use std::f64::consts::PI;

    const FS: f64 = 250.0;
    const N: usize = 375;
    const FREQS: [f64; 4] = [10.0, 12.0, 15.0, 20.0];

    /// Phase-shifted SSVEP-like window with a second harmonic and mild noise
    fn ssvep(freq: f64, channels: usize, seed: u64) -> DMatrix<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        DMatrix::from_fn(N, channels, |r, c| {
            let t = r as f64 / FS;
            let phase = 0.4 * c as f64;
            10.0 * (2.0 * PI * freq * t + phase).sin()
                + 3.0 * (2.0 * PI * 2.0 * freq * t + phase).sin()
                + normal.sample(&mut rng)
        })
    }

    fn rank_for(scorer: &dyn FrequencyScorer, freq: f64) -> (usize, Ranking) {
        let pre = Preprocessor::new(FS, 50.0).unwrap();
        let refs = ReferenceSet::new(&FREQS, FS, N);
        let window = pre.remove_line_noise(&ssvep(freq, 4, 11));
        let scores = ScoreVector::compute(scorer, &window, &refs);
        assert_eq!(scores.failures(), 0);
        let ranking = scores.rank().unwrap();
        (ranking.best, ranking)
    }

    #[test]
    fn test_harmonic_scorer_finds_target() {
        let pre = Preprocessor::new(FS, 50.0).unwrap();
        let scorer = HarmonicScorer::new(pre);
        for (i, &f) in FREQS.iter().enumerate() {
            let (best, ranking) = rank_for(&scorer, f);
            assert_eq!(best, i, "target {f} Hz");
            assert!(ranking.r1 > 1.5, "r1 {} for {f} Hz", ranking.r1);
            assert!(ranking.margin > 0.0);
        }
    }

    #[test]
    fn test_filter_bank_scorer_finds_target() {
        let pre = Preprocessor::new(FS, 50.0).unwrap();
        let scorer = FilterBankScorer::new(&pre);
        assert_eq!(scorer.bands().count(), 4);
        // 20 Hz shares its fundamental with the 10 Hz second harmonic
        for (i, &f) in FREQS.iter().enumerate().take(3) {
            let (best, _) = rank_for(&scorer, f);
            assert_eq!(best, i, "target {f} Hz");
        }
    }

    #[test]
    fn test_filter_bank_drops_bands_above_nyquist() {
        // Nyquist 25 Hz: (26, 32) is unusable, (20, 26) is clamped to 24
        let pre = Preprocessor::new(50.0, 0.0).unwrap();
        let scorer = FilterBankScorer::new(&pre);
        let bands: Vec<_> = scorer.bands().copied().collect();
        assert_eq!(bands.len(), 3);
        assert_relative_eq!(bands[2].high_hz, 24.0);
    }

    #[test]
    fn test_scorer_factory() {
        let pre = Preprocessor::new(FS, 50.0).unwrap();
        assert_eq!(scorer_for(ScoringMethod::CcaPlus, &pre).method(), ScoringMethod::CcaPlus);
        assert_eq!(scorer_for(ScoringMethod::Fbcca, &pre).method(), ScoringMethod::Fbcca);
    }

    #[test]
    fn test_rank_best_and_runner_up() {
        let scores = ScoreVector::from_scores(vec![Some(0.4), Some(1.2), None, Some(0.9)]);
        let ranking = scores.rank().unwrap();
        assert_eq!(ranking.best, 1);
        assert_relative_eq!(ranking.r1, 1.2);
        assert_relative_eq!(ranking.r2, 0.9);
        assert_relative_eq!(ranking.margin, 0.3, epsilon = 1e-12);
        assert_eq!(scores.failures(), 1);
    }

    #[test]
    fn test_rank_failed_candidate_never_wins() {
        let scores = ScoreVector::from_scores(vec![None, Some(0.1)]);
        assert_eq!(scores.rank().unwrap().best, 1);
        assert_eq!(ScoreVector::from_scores(vec![None, None]).rank(), None);
    }

    #[test]
    fn test_rank_tie_goes_to_first_class() {
        let scores = ScoreVector::from_scores(vec![Some(0.7), Some(0.7)]);
        let ranking = scores.rank().unwrap();
        assert_eq!(ranking.best, 0);
        assert_relative_eq!(ranking.margin, 0.0);
    }

    #[test]
    fn test_rank_single_class() {
        let ranking = ScoreVector::from_scores(vec![Some(0.8)]).rank().unwrap();
        assert_relative_eq!(ranking.r2, 0.0);
        assert_relative_eq!(ranking.margin, 0.8);
    }
}
