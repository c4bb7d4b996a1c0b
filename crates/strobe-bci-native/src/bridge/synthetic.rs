//! Synthetic SSVEP source for simulation runs and pipeline tests
//!
//! [`SyntheticSource`] produces a multichannel signal with a response at the
//! attended frequency (fundamental plus a weaker second harmonic, phase
//! shifted per channel) buried in seeded Gaussian noise. [`ScriptedMarkers`]
//! replays the stimulus presenter's marker sequence against the same sample
//! clock.

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::bridge::source::{MarkerSource, SampleSource};
use crate::error::{ConfigError, ConfigResult, SourceError, SourceResult};

/// Phase step between neighbouring channels (radians)
const CHANNEL_PHASE_STEP: f64 = 0.7;

/// Generator settings
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Sample rate (Hz)
    pub sample_rate: f64,
    /// Number of channels
    pub channel_count: usize,
    /// Fundamental amplitude (µV)
    pub amplitude: f64,
    /// Second-harmonic amplitude relative to the fundamental
    pub harmonic_ratio: f64,
    /// Noise standard deviation (µV)
    pub noise_std: f64,
    /// Samples per pulled chunk
    pub chunk_size: usize,
    /// Noise seed
    pub seed: u64,
    /// Stop after this many seconds; `None` follows the stimulus
    pub duration_s: Option<f64>,
    /// Pace chunks at the nominal rate
    pub realtime: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            sample_rate: 250.0,
            channel_count: 8,
            amplitude: 10.0,
            harmonic_ratio: 0.3,
            noise_std: 1.0,
            chunk_size: 25,
            seed: 7,
            duration_s: None,
            realtime: false,
        }
    }
}

// ============================================================================
// Trial schedule
// ============================================================================

/// Cue / stimulus / rest timing of a simulated session.
#[derive(Clone, Debug, PartialEq)]
pub struct TrialSchedule {
    /// Target frequency of each trial, in presentation order
    pub targets: Vec<f64>,
    /// Cue length (s)
    pub cue_s: f64,
    /// Stimulus length (s)
    pub trial_s: f64,
    /// Rest length (s)
    pub rest_s: f64,
    /// Quiet time before the first cue (s)
    pub lead_in_s: f64,
}

impl TrialSchedule {
    /// A schedule with the presenter's default timing
    #[must_use]
    pub fn new(targets: Vec<f64>) -> Self {
        Self { targets, cue_s: 0.5, trial_s: 1.0, rest_s: 2.0, lead_in_s: 0.5 }
    }

    /// `per_class` trials of every frequency in seeded random order
    #[must_use]
    pub fn shuffled(freqs: &[f64], per_class: usize, seed: u64) -> Self {
        let mut targets: Vec<f64> = freqs
            .iter()
            .flat_map(|&f| std::iter::repeat(f).take(per_class))
            .collect();
        targets.shuffle(&mut StdRng::seed_from_u64(seed));
        Self::new(targets)
    }

    /// Length of one cue-stimulus-rest cycle
    #[must_use]
    pub fn period_s(&self) -> f64 {
        self.cue_s + self.trial_s + self.rest_s
    }

    /// Total session length
    #[must_use]
    pub fn duration_s(&self) -> f64 {
        self.lead_in_s + self.period_s() * self.targets.len() as f64
    }

    /// Every marker of the session as `(payload, timestamp)`, in time order
    #[must_use]
    pub fn markers(&self) -> Vec<(String, f64)> {
        let mut markers = Vec::with_capacity(self.targets.len() * 5);
        for (i, f) in self.targets.iter().enumerate() {
            let cue = self.lead_in_s + self.period_s() * i as f64;
            let start = cue + self.cue_s;
            let end = start + self.trial_s;
            markers.push((format!("CUE|{f:?}"), cue));
            markers.push((format!("TRIAL_START|{f:?}"), start));
            markers.push((format!("TRIAL_END|{f:?}"), end));
            markers.push(("REST_START".to_string(), end));
            markers.push(("REST_END".to_string(), end + self.rest_s));
        }
        markers
    }

    /// Frequency on screen at time `t`, if a stimulus is running
    #[must_use]
    pub fn frequency_at(&self, t: f64) -> Option<f64> {
        let since = t - self.lead_in_s;
        if since < 0.0 {
            return None;
        }
        let period = self.period_s();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = (since / period).floor() as usize;
        let target = *self.targets.get(index)?;
        let offset = since - period * index as f64;
        (offset >= self.cue_s && offset < self.cue_s + self.trial_s).then_some(target)
    }
}

/// What the simulated subject attends to
#[derive(Clone, Debug, PartialEq)]
pub enum Stimulus {
    /// A fixed frequency for the whole run, or no stimulus at all
    Constant(Option<f64>),
    /// A scripted session with markers
    Scheduled(TrialSchedule),
}

impl Stimulus {
    fn frequency_at(&self, t: f64) -> Option<f64> {
        match self {
            Self::Constant(f) => *f,
            Self::Scheduled(schedule) => schedule.frequency_at(t),
        }
    }
}

// ============================================================================
// Sample source
// ============================================================================

/// Seeded SSVEP-like sample generator.
pub struct SyntheticSource {
    config: SyntheticConfig,
    stimulus: Stimulus,
    noise: Normal<f64>,
    rng: StdRng,
    /// Samples emitted so far; the clock shared with [`ScriptedMarkers`]
    emitted: Arc<AtomicU64>,
    total: Option<u64>,
    started: Option<Instant>,
}

impl SyntheticSource {
    /// Create a generator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a non-positive rate, zero
    /// channels or chunk size, or a negative noise level.
    pub fn new(config: SyntheticConfig, stimulus: Stimulus) -> ConfigResult<Self> {
        if !(config.sample_rate.is_finite() && config.sample_rate > 0.0) {
            return Err(ConfigError::invalid("sample_rate", format!("{} must be positive", config.sample_rate)));
        }
        if config.channel_count == 0 {
            return Err(ConfigError::invalid("channel_count", "must be at least 1"));
        }
        if config.chunk_size == 0 {
            return Err(ConfigError::invalid("chunk_size", "must be at least 1"));
        }
        let noise = Normal::new(0.0, config.noise_std)
            .map_err(|e| ConfigError::invalid("noise_std", e.to_string()))?;

        let duration = config.duration_s.or(match &stimulus {
            Stimulus::Scheduled(schedule) => Some(schedule.duration_s()),
            Stimulus::Constant(_) => None,
        });
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let total = duration.map(|d| (d.max(0.0) * config.sample_rate).round() as u64);

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            stimulus,
            noise,
            emitted: Arc::new(AtomicU64::new(0)),
            total,
            started: None,
        })
    }

    /// Marker feed on this source's clock; empty unless the stimulus is scheduled
    #[must_use]
    pub fn marker_feed(&self) -> ScriptedMarkers {
        let markers = match &self.stimulus {
            Stimulus::Scheduled(schedule) => schedule.markers(),
            Stimulus::Constant(_) => Vec::new(),
        };
        ScriptedMarkers {
            pending: markers.into(),
            emitted: Arc::clone(&self.emitted),
            sample_rate: self.config.sample_rate,
        }
    }

    /// Samples emitted so far
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Acquire)
    }

    fn sample_at(&mut self, n: u64) -> Vec<f64> {
        let t = n as f64 / self.config.sample_rate;
        let response = self.stimulus.frequency_at(t);
        (0..self.config.channel_count)
            .map(|c| {
                let phase = CHANNEL_PHASE_STEP * c as f64;
                let evoked = response.map_or(0.0, |f| {
                    let w = 2.0 * PI * f * t;
                    self.config.amplitude
                        * ((w + phase).sin() + self.config.harmonic_ratio * (2.0 * w + 2.0 * phase).sin())
                });
                evoked + self.noise.sample(&mut self.rng)
            })
            .collect()
    }
}

impl SampleSource for SyntheticSource {
    fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    fn channel_count(&self) -> usize {
        self.config.channel_count
    }

    fn pull_chunk(&mut self, timeout: Duration) -> SourceResult<Vec<Vec<f64>>> {
        let emitted = self.emitted();
        let remaining = self.total.map_or(u64::MAX, |total| total.saturating_sub(emitted));
        if remaining == 0 {
            return Err(SourceError::EndOfStream);
        }
        let count = remaining.min(self.config.chunk_size as u64);

        if self.config.realtime {
            let started = *self.started.get_or_insert_with(Instant::now);
            let due = started + Duration::from_secs_f64((emitted + count) as f64 / self.config.sample_rate);
            let wait = due.saturating_duration_since(Instant::now());
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(Vec::new());
            }
            std::thread::sleep(wait);
        }

        let chunk = (emitted..emitted + count).map(|n| self.sample_at(n)).collect();
        self.emitted.store(emitted + count, Ordering::Release);
        Ok(chunk)
    }

    fn clock(&self) -> f64 {
        self.emitted() as f64 / self.config.sample_rate
    }
}

// ============================================================================
// Marker feed
// ============================================================================

/// Replays scheduled markers once the sample clock reaches their timestamp.
pub struct ScriptedMarkers {
    pending: VecDeque<(String, f64)>,
    emitted: Arc<AtomicU64>,
    sample_rate: f64,
}

impl ScriptedMarkers {
    /// Markers not yet released
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl MarkerSource for ScriptedMarkers {
    /// Never blocks; the clock only moves when samples are pulled.
    fn pull_marker(&mut self, _timeout: Duration) -> SourceResult<Option<(String, f64)>> {
        let now = self.emitted.load(Ordering::Acquire) as f64 / self.sample_rate;
        match self.pending.front() {
            Some((_, ts)) if *ts <= now => Ok(self.pending.pop_front()),
            _ => Ok(None),
        }
    }
}
