//! Online decoding loop
//!
//! [`OnlineDecoder`] owns every piece of per-run state: the sample buffer,
//! the reference set, the scorer and the [`SessionState`] aggregate. Each
//! iteration drains pending markers, appends the new samples and decodes
//! the trailing window into one [`DecisionRecord`].
//!
//! ```text
//! markers ──► SessionState
//! samples ──► RingBuffer ──► Preprocessor ──► FrequencyScorer ──► DecisionEngine ──► recorder
//!                                                     └──► FrequencyCalibrator (fine-tune)
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nalgebra::DMatrix;
use strobe_bci_core::{class_index, MarkerEvent};
use tracing::{debug, info, warn};

use crate::bridge::{MarkerSource, SampleSource};
use crate::config::PipelineConfig;
use crate::decoding::{
    scorer_for, CalibrationEntry, DecisionEngine, FrequencyCalibrator, FrequencyScorer, ScoreVector, SessionState,
    TrialState, WindowScore,
};
use crate::error::{ConfigError, PipelineResult, SourceError, SourceResult};
use crate::processing::{Preprocessor, ReferenceSet, RingBuffer};
use crate::recorder::{DecisionRecord, DecisionRecorder};

/// Sample pull timeout; bounds how long a shutdown request can go unseen
pub const PULL_TIMEOUT: Duration = Duration::from_millis(200);

// ============================================================================
// Statistics
// ============================================================================

/// Counters accumulated over a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Windows that produced a decision
    pub windows: u64,
    /// Decisions suppressed by the idle gate
    pub idle: u64,
    /// Early-stop locks
    pub early_locks: u64,
    /// Candidate fits that failed
    pub candidate_failures: u64,
    /// Decisions matching the ground truth
    pub correct: u64,
    /// Decisions contradicting the ground truth
    pub wrong: u64,
    /// Windows dropped because no candidate could be scored
    pub skipped: u64,
}

impl PipelineStats {
    /// Window-level accuracy over decisions that had a ground truth
    #[must_use]
    pub fn accuracy(&self) -> Option<f64> {
        let judged = self.correct + self.wrong;
        #[allow(clippy::cast_precision_loss)]
        (judged > 0).then(|| self.correct as f64 / judged as f64)
    }

    fn observe(&mut self, record: &DecisionRecord) {
        self.windows += 1;
        self.idle += u64::from(record.flags.idle);
        self.early_locks += u64::from(record.early);
        self.correct += u64::from(record.flags.correct);
        self.wrong += u64::from(record.flags.wrong);
    }

    /// Log a one-line run summary
    pub fn log_summary(&self) {
        info!(
            windows = self.windows,
            idle = self.idle,
            early_locks = self.early_locks,
            correct = self.correct,
            wrong = self.wrong,
            accuracy = ?self.accuracy(),
            candidate_failures = self.candidate_failures,
            skipped = self.skipped,
            "Run summary"
        );
    }
}

// ============================================================================
// Online Decoder
// ============================================================================

/// Single-threaded online SSVEP decoder
pub struct OnlineDecoder {
    config: PipelineConfig,
    window: usize,
    channels: Option<Vec<usize>>,
    buffer: RingBuffer,
    preprocessor: Preprocessor,
    scorer: Box<dyn FrequencyScorer>,
    references: ReferenceSet,
    calibrator: FrequencyCalibrator,
    engine: DecisionEngine,
    session: SessionState,
    stats: PipelineStats,
}

impl OnlineDecoder {
    /// Build a decoder for a stream of `channel_count` channels at
    /// `sample_rate`. Without a marker stream, early stop never fires.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`](crate::error::PipelineError::Config)
    /// if the configuration does not fit the stream, or
    /// [`PipelineError::Filter`](crate::error::PipelineError::Filter) if the
    /// line-noise filter cannot be designed.
    pub fn new(
        config: PipelineConfig,
        sample_rate: f64,
        channel_count: usize,
        markers_available: bool,
    ) -> PipelineResult<Self> {
        config.validate()?;
        config.validate_for_stream(sample_rate)?;
        if channel_count == 0 {
            return Err(ConfigError::invalid("channel_count", "stream has no channels").into());
        }
        let channels = config.resolve_channels(channel_count)?;
        let window = config.window_samples(sample_rate);

        let preprocessor = Preprocessor::new(sample_rate, config.notch_hz)?;
        let scorer = scorer_for(config.method, &preprocessor);
        let mut references = ReferenceSet::new(&config.freqs, sample_rate, window);

        let mut session = SessionState::new(config.freqs.len(), config.vote, config.vote_reset);
        for index in session.calibration.preload(&config.freqs, &config.calibration) {
            if let Some(tuned_hz) = session.calibration.tuned(index) {
                references.retune(index, tuned_hz);
            }
        }

        let engine = DecisionEngine::new(config.idle, config.early_stop, markers_available);
        if config.early_stop.enabled && !markers_available {
            warn!("Early stop requested but no marker stream is available; it will not fire");
        }

        info!(
            method = %config.method,
            window_s = config.window_s,
            window_samples = window,
            sample_rate,
            channels = ?channels,
            freqs = ?config.freqs,
            notch_hz = config.notch_hz,
            vote = config.vote,
            "Decoder ready"
        );

        Ok(Self {
            buffer: RingBuffer::for_window(window, channel_count),
            calibrator: FrequencyCalibrator::new(sample_rate),
            config,
            window,
            channels,
            preprocessor,
            scorer,
            references,
            engine,
            session,
            stats: PipelineStats::default(),
        })
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Window length in samples
    #[must_use]
    pub fn window_samples(&self) -> usize {
        self.window
    }

    /// Decoded channel indices, `None` for all
    #[must_use]
    pub fn channels(&self) -> Option<&[usize]> {
        self.channels.as_deref()
    }

    /// Decoder state carried across windows
    #[must_use]
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Candidate references, with any tuned frequencies applied
    #[must_use]
    pub fn references(&self) -> &ReferenceSet {
        &self.references
    }

    /// Counters so far
    #[must_use]
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Tuned classes so far
    #[must_use]
    pub fn calibration(&self) -> Vec<CalibrationEntry> {
        self.session.calibration.entries(&self.config.freqs)
    }

    /// Apply a raw marker payload. Unknown or empty payloads are ignored.
    pub fn handle_marker(&mut self, payload: &str, timestamp: f64) {
        match MarkerEvent::parse(payload) {
            Ok(event) => {
                debug!(kind = event.kind(), frequency_hz = ?event.frequency_hz(), timestamp, "Marker");
                self.session.apply_marker(&event, timestamp);
            }
            Err(err) => debug!(%err, payload, "Ignoring marker"),
        }
    }

    /// Append a chunk of samples (`chunk[i][c]`).
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::ChannelMismatch`](crate::error::BufferError::ChannelMismatch)
    /// if a sample has the wrong width.
    pub fn push_samples(&mut self, chunk: &[Vec<f64>]) -> PipelineResult<()> {
        self.buffer.append(chunk)?;
        Ok(())
    }

    /// Decode the trailing window.
    ///
    /// `prediction_time` is read once the scores are in. Returns `None`
    /// until a full window has been buffered, and for windows where no
    /// candidate could be scored.
    ///
    /// With `fine_tune`, a class is tuned after its first window with known
    /// truth has been decided, so that window still scores against the
    /// nominal reference and the tuned one applies from the next window.
    ///
    /// # Errors
    ///
    /// Returns a buffer error if the window cannot be extracted.
    pub fn decode_window(&mut self, prediction_time: impl FnOnce() -> f64) -> PipelineResult<Option<DecisionRecord>> {
        if self.buffer.len() < self.window {
            return Ok(None);
        }
        let window = self.prepared_window()?;

        let scores = ScoreVector::compute(self.scorer.as_ref(), &window, &self.references);
        self.stats.candidate_failures += scores.failures() as u64;
        let Some(ranking) = scores.rank() else {
            self.stats.skipped += 1;
            debug!(classes = scores.len(), "No candidate could be scored, skipping window");
            return Ok(None);
        };
        let Some(&raw_prediction_hz) = self.config.freqs.get(ranking.best) else {
            return Ok(None);
        };

        let now = prediction_time();
        let score = WindowScore { raw_prediction_hz, r1: ranking.r1, r2: ranking.r2, margin: ranking.margin };
        let decision = self.engine.decide(&mut self.session, &score, now);

        if self.config.fine_tune {
            self.calibrate(&window);
        }

        let record = DecisionRecord::new(&decision, &self.session.trial, self.config.method, self.config.window_s, now);
        info!(
            prediction_hz = ?record.prediction_hz,
            raw_hz = record.raw_prediction_hz,
            score = record.score,
            margin = record.margin,
            truth_hz = ?record.truth_hz,
            latency_s = ?record.latency_s,
            flags = %record.flags,
            "Decision"
        );
        self.stats.observe(&record);
        Ok(Some(record))
    }

    /// Trailing window, channel-selected, notched and baseline-removed
    fn prepared_window(&self) -> PipelineResult<DMatrix<f64>> {
        let raw = self.buffer.extract_window(self.window)?;
        let selected = match &self.channels {
            Some(indices) => raw.select_columns(indices.iter()),
            None => raw,
        };
        Ok(self.preprocessor.remove_line_noise(&selected))
    }

    /// Tune the current ground-truth class the first time it is seen
    fn calibrate(&mut self, window: &DMatrix<f64>) {
        let Some(truth_hz) = self.session.trial.truth_hz else { return };
        let Some(index) = class_index(&self.config.freqs, truth_hz) else { return };
        if !self.session.calibration.needs_search(index) {
            return;
        }

        self.session.calibration.mark_attempted(index);
        match self.calibrator.tune(window, truth_hz) {
            Some(tuned_hz) => {
                self.session.calibration.record(index, tuned_hz);
                self.references.retune(index, tuned_hz);
                info!(nominal_hz = truth_hz, tuned_hz, "Calibrated class frequency");
            }
            None => debug!(nominal_hz = truth_hz, "Calibration failed at every offset"),
        }
    }

    /// Continue class-only after the marker feed failed.
    ///
    /// The last trial's start time and truth are stale from here on, so they
    /// are dropped along with early stop.
    fn markers_lost(&mut self) {
        self.engine.markers_lost();
        self.session.trial = TrialState::default();
    }

    /// Drain every marker available right now
    fn drain_markers(&mut self, feed: &mut dyn MarkerSource) -> SourceResult<()> {
        while let Some((payload, timestamp)) = feed.pull_marker(Duration::ZERO)? {
            self.handle_marker(&payload, timestamp);
        }
        Ok(())
    }

    /// Run until the sample source ends or `shutdown` is set.
    ///
    /// A failing marker feed is dropped with one warning and the run
    /// continues without ground truth.
    ///
    /// # Errors
    ///
    /// Returns sample source errors other than end of stream, and recorder
    /// errors.
    pub fn run<S, W>(
        &mut self,
        samples: &mut S,
        mut markers: Option<&mut dyn MarkerSource>,
        recorder: &mut DecisionRecorder<W>,
        shutdown: &AtomicBool,
    ) -> PipelineResult<()>
    where
        S: SampleSource + ?Sized,
        W: Write,
    {
        info!(markers = markers.is_some(), "Decoding started");
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Shutdown requested");
                break;
            }

            let marker_failure = match markers.as_deref_mut() {
                Some(feed) => self.drain_markers(feed).err(),
                None => None,
            };
            if let Some(err) = marker_failure {
                warn!(%err, "Marker stream lost; continuing without ground truth");
                markers = None;
                self.markers_lost();
            }

            let chunk = match samples.pull_chunk(PULL_TIMEOUT) {
                Ok(chunk) => chunk,
                Err(SourceError::EndOfStream) => {
                    info!("Sample stream ended");
                    break;
                }
                Err(err) => return Err(err.into()),
            };
            if chunk.is_empty() {
                continue;
            }
            self.push_samples(&chunk)?;

            if let Some(record) = self.decode_window(|| samples.clock())? {
                recorder.record(&record)?;
            }
        }

        self.stats.log_summary();
        Ok(())
    }
}
