//! Decision log and run metadata
//!
//! Every processed window becomes one CSV row, flushed immediately so an
//! interrupted run loses nothing. The run configuration is written once as
//! `<log stem>.meta.json` next to the log, so runs sharing a directory keep
//! their own metadata.

use std::fmt::Display;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use strobe_bci_core::{DecisionFlags, DecoderState, EarlyStopConfig, IdleGateConfig, ScoringMethod, VoteResetPolicy};
use tracing::info;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::decoding::{CalibrationEntry, Decision, TrialState};
use crate::error::RecorderResult;

/// CSV column names, in row order
pub const CSV_HEADER: [&str; 16] = [
    "lsl_trial_start",
    "lsl_pred_time",
    "latency_sec",
    "true_freq",
    "pred_freq",
    "raw_pred",
    "method",
    "window_s",
    "note",
    "score",
    "r1",
    "r2",
    "margin",
    "early",
    "locked",
    "state",
];

/// Suffix appended to the log stem for the run metadata file
pub const METADATA_SUFFIX: &str = ".meta.json";

// ============================================================================
// Decision Record
// ============================================================================

/// One emitted row
#[derive(Clone, Debug, PartialEq)]
pub struct DecisionRecord {
    /// Start of the current trial, if known
    pub trial_start: Option<f64>,
    /// Time the prediction was made
    pub prediction_time: f64,
    /// `prediction_time - trial_start`
    pub latency_s: Option<f64>,
    /// Ground truth, absent during rest
    pub truth_hz: Option<f64>,
    /// Voted prediction, absent when idle
    pub prediction_hz: Option<f64>,
    /// Unvoted arg-max
    pub raw_prediction_hz: f64,
    /// Scoring method
    pub method: ScoringMethod,
    /// Window length (s)
    pub window_s: f64,
    /// Annotation tags
    pub flags: DecisionFlags,
    /// Best score
    pub score: f64,
    /// Best score
    pub r1: f64,
    /// Second-best score
    pub r2: f64,
    /// `r1 - r2`
    pub margin: f64,
    /// Early stop fired on this window
    pub early: bool,
    /// Trial locked
    pub locked: bool,
    /// Processing state
    pub state: DecoderState,
}

impl DecisionRecord {
    /// Combine an engine decision with the trial context it was made in
    #[must_use]
    pub fn new(
        decision: &Decision,
        trial: &TrialState,
        method: ScoringMethod,
        window_s: f64,
        prediction_time: f64,
    ) -> Self {
        Self {
            trial_start: trial.start_time,
            prediction_time,
            latency_s: trial.start_time.map(|start| prediction_time - start),
            truth_hz: trial.truth_hz,
            prediction_hz: decision.prediction_hz,
            raw_prediction_hz: decision.raw_prediction_hz,
            method,
            window_s,
            flags: decision.flags,
            score: decision.r1,
            r1: decision.r1,
            r2: decision.r2,
            margin: decision.margin,
            early: decision.early,
            locked: decision.locked,
            state: decision.state,
        }
    }

    /// Field values in [`CSV_HEADER`] order; absent values are empty
    #[must_use]
    pub fn fields(&self) -> [String; 16] {
        fn opt<T: Display>(value: Option<T>) -> String {
            value.map(|v| v.to_string()).unwrap_or_default()
        }

        [
            opt(self.trial_start),
            self.prediction_time.to_string(),
            opt(self.latency_s),
            opt(self.truth_hz),
            opt(self.prediction_hz),
            self.raw_prediction_hz.to_string(),
            self.method.label().to_string(),
            self.window_s.to_string(),
            self.flags.to_string(),
            self.score.to_string(),
            self.r1.to_string(),
            self.r2.to_string(),
            self.margin.to_string(),
            self.early.to_string(),
            self.locked.to_string(),
            self.state.label().to_string(),
        ]
    }
}

// ============================================================================
// CSV Recorder
// ============================================================================

/// Appends decision rows to a CSV sink.
pub struct DecisionRecorder<W: Write> {
    writer: W,
    rows: u64,
}

impl DecisionRecorder<BufWriter<File>> {
    /// Create (or truncate) a CSV log file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Io`](crate::error::RecorderError::Io) if the
    /// file cannot be created or the header cannot be written.
    pub fn create(path: &Path) -> RecorderResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let recorder = Self::new(BufWriter::new(File::create(path)?))?;
        info!(path = %path.display(), "Writing decision log");
        Ok(recorder)
    }
}

impl<W: Write> DecisionRecorder<W> {
    /// Wrap a sink and write the header.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the header cannot be written.
    pub fn new(mut writer: W) -> RecorderResult<Self> {
        writeln!(writer, "{}", CSV_HEADER.join(","))?;
        writer.flush()?;
        Ok(Self { writer, rows: 0 })
    }

    /// Append one row and flush it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the row cannot be written.
    pub fn record(&mut self, record: &DecisionRecord) -> RecorderResult<()> {
        let fields = record.fields();
        let line = fields.iter().map(|f| escape(f)).collect::<Vec<_>>().join(",");
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written so far
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush and return the sink.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the final flush fails.
    pub fn into_inner(mut self) -> RecorderResult<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Quote a field containing a separator, quote or newline
fn escape(field: &str) -> std::borrow::Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\"")).into()
    } else {
        field.into()
    }
}

// ============================================================================
// Run Metadata
// ============================================================================

/// Configuration snapshot persisted once per run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Unique run identifier
    pub run_id: Uuid,
    /// RFC 3339 creation time
    pub created_at: String,
    /// Scoring method label
    pub method: String,
    /// Window length (s)
    pub window_s: f64,
    /// Candidate frequencies (Hz)
    pub freqs: Vec<f64>,
    /// Line-noise frequency (Hz), 0 when disabled
    pub notch_hz: f64,
    /// Selected channel indices; `None` means every channel
    pub channels: Option<Vec<usize>>,
    /// Vote window size
    pub vote: usize,
    /// Vote history reset policy
    pub vote_reset: VoteResetPolicy,
    /// Early-stop thresholds
    pub early_stop: EarlyStopConfig,
    /// Idle-gate thresholds
    pub idle: IdleGateConfig,
    /// Frequency fine-tuning enabled
    pub fine_tune: bool,
    /// Calibration map at startup
    pub calibration: Vec<CalibrationEntry>,
    /// Stream sample rate (Hz)
    pub sample_rate: f64,
    /// Stream channel count
    pub channel_count: usize,
    /// Sample source description
    pub source: String,
    /// Whether a marker stream was connected
    pub markers: bool,
}

impl RunMetadata {
    /// Snapshot a validated configuration for the stream it runs against
    #[must_use]
    pub fn new(
        config: &PipelineConfig,
        sample_rate: f64,
        channel_count: usize,
        channels: Option<&[usize]>,
        source: impl Into<String>,
        markers: bool,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            created_at: Utc::now().to_rfc3339(),
            method: config.method.label().to_string(),
            window_s: config.window_s,
            freqs: config.freqs.clone(),
            notch_hz: config.notch_hz,
            channels: channels.map(<[usize]>::to_vec),
            vote: config.vote,
            vote_reset: config.vote_reset,
            early_stop: config.early_stop,
            idle: config.idle,
            fine_tune: config.fine_tune,
            calibration: config.calibration.clone(),
            sample_rate,
            channel_count,
            source: source.into(),
            markers,
        }
    }

    /// Metadata location for a decision log: `run.csv` -> `run.meta.json`
    #[must_use]
    pub fn path_for(log_path: &Path) -> PathBuf {
        let stem = log_path.file_stem().map_or_else(|| "run".into(), |s| s.to_string_lossy());
        log_path.with_file_name(format!("{stem}{METADATA_SUFFIX}"))
    }

    /// Write as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an I/O or JSON error.
    pub fn write(&self, path: &Path) -> RecorderResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!(path = %path.display(), run_id = %self.run_id, "Wrote run metadata");
        Ok(())
    }
}

// ============================================================================
// Log naming
// ============================================================================

/// Short method token used in log file names
fn method_token(method: ScoringMethod) -> &'static str {
    match method {
        ScoringMethod::CcaPlus => "CCA",
        ScoringMethod::Fbcca => "FBCCA",
    }
}

/// Next free log path `<subject>_<method>_w1p5_v3[_allch].csv` in `dir`.
///
/// An existing file is never reused: `_1`, `_2`, ... are appended until the
/// name is free.
#[must_use]
pub fn log_file_name(
    dir: &Path,
    subject: &str,
    method: ScoringMethod,
    window_s: f64,
    vote: usize,
    all_channels: bool,
) -> PathBuf {
    let window = format!("w{window_s:.1}").replace('.', "p");
    let mut base = format!("{subject}_{}_{window}_v{vote}", method_token(method));
    if all_channels {
        base.push_str("_allch");
    }

    let mut path = dir.join(format!("{base}.csv"));
    let mut counter = 1;
    while path.exists() {
        path = dir.join(format!("{base}_{counter}.csv"));
        counter += 1;
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use strobe_bci_core::MarkerEvent;

    fn decision(prediction: Option<f64>, flags: DecisionFlags) -> Decision {
        Decision {
            state: if prediction.is_some() { DecoderState::Control } else { DecoderState::Idle },
            prediction_hz: prediction,
            raw_prediction_hz: 12.0,
            r1: 1.5,
            r2: 0.75,
            margin: 0.75,
            early: flags.early,
            locked: flags.locked,
            flags,
        }
    }

    /// Counts flushes so per-row durability can be checked
    #[derive(Default)]
    struct FlushCounter {
        data: Vec<u8>,
        flushes: usize,
    }

    impl Write for FlushCounter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn test_record_fields_with_trial() {
        let mut trial = TrialState::default();
        trial.apply_marker(&MarkerEvent::TrialStart { frequency_hz: Some(12.0) }, 100.0);
        let flags = DecisionFlags { correct: true, ..DecisionFlags::default() };
        let record = DecisionRecord::new(&decision(Some(12.0), flags), &trial, ScoringMethod::Fbcca, 1.5, 101.25);

        assert_eq!(record.latency_s, Some(1.25));
        let fields = record.fields();
        assert_eq!(fields[0], "100");
        assert_eq!(fields[2], "1.25");
        assert_eq!(fields[3], "12");
        assert_eq!(fields[6], "FBCCA");
        assert_eq!(fields[8], "CORRECT");
        assert_eq!(fields[15], "CONTROL");
    }

    #[test]
    fn test_absent_values_are_empty() {
        let trial = TrialState::default();
        let flags = DecisionFlags { idle: true, ..DecisionFlags::default() };
        let record = DecisionRecord::new(&decision(None, flags), &trial, ScoringMethod::CcaPlus, 1.0, 5.0);
        let fields = record.fields();
        assert_eq!(fields[0], "");
        assert_eq!(fields[2], "");
        assert_eq!(fields[3], "");
        assert_eq!(fields[4], "");
        assert_eq!(fields[5], "12");
        assert_eq!(fields[8], "IDLE");
    }

    #[test]
    fn test_header_once_and_flush_per_row() {
        let mut recorder = DecisionRecorder::new(FlushCounter::default()).unwrap();
        let trial = TrialState::default();
        let record = DecisionRecord::new(
            &decision(Some(12.0), DecisionFlags::default()),
            &trial,
            ScoringMethod::CcaPlus,
            1.5,
            2.0,
        );
        recorder.record(&record).unwrap();
        recorder.record(&record).unwrap();
        assert_eq!(recorder.rows(), 2);

        let sink = recorder.into_inner().unwrap();
        assert!(sink.flushes >= 3);
        let text = String::from_utf8(sink.data).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER.join(","));
        assert_eq!(lines.iter().filter(|l| l.starts_with("lsl_trial_start")).count(), 1);
        assert_eq!(lines[1], ",2,,,12,12,CCA+,1.5,,1.5,1.5,0.75,0.75,false,false,CONTROL");
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_create_writes_header_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run.csv");
        let recorder = DecisionRecorder::create(&path).unwrap();
        drop(recorder);
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), CSV_HEADER.join(","));
    }

    #[test]
    fn test_metadata_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default();
        let meta = RunMetadata::new(&config, 250.0, 8, Some(&[2, 3, 6, 7]), "synthetic", true);
        let path = RunMetadata::path_for(&dir.path().join("S01_CCA_w1p5_v3.csv"));
        assert_eq!(path, dir.path().join("S01_CCA_w1p5_v3.meta.json"));
        meta.write(&path).unwrap();

        let loaded: RunMetadata = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, meta);
        assert_eq!(loaded.method, "CCA+");
        assert_eq!(loaded.channels, Some(vec![2, 3, 6, 7]));
        assert!(chrono::DateTime::parse_from_rfc3339(&loaded.created_at).is_ok());
    }

    #[test]
    fn test_runs_in_one_directory_keep_separate_metadata() {
        let dir = tempfile::tempdir().unwrap();

        let cca = PipelineConfig::default();
        let first_log = log_file_name(dir.path(), "S01", cca.method, cca.window_s, cca.vote, true);
        fs::write(&first_log, "").unwrap();
        let first_meta = RunMetadata::path_for(&first_log);
        RunMetadata::new(&cca, 250.0, 8, None, "synthetic", true).write(&first_meta).unwrap();

        let fbcca = PipelineConfig { method: ScoringMethod::Fbcca, window_s: 1.0, ..PipelineConfig::default() };
        let second_log = log_file_name(dir.path(), "S01", fbcca.method, fbcca.window_s, fbcca.vote, true);
        fs::write(&second_log, "").unwrap();
        let second_meta = RunMetadata::path_for(&second_log);
        RunMetadata::new(&fbcca, 250.0, 8, None, "synthetic", true).write(&second_meta).unwrap();

        assert_ne!(first_meta, second_meta);
        let read = |path: &Path| -> RunMetadata { serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap() };
        let first = read(&first_meta);
        let second = read(&second_meta);
        assert_eq!(first.method, "CCA+");
        assert_eq!(first.window_s, 1.5);
        assert_eq!(second.method, "FBCCA");
        assert_eq!(second.window_s, 1.0);
        assert_ne!(first.run_id, second.run_id);

        // Same stem twice: the suffixed log gets its own metadata too
        let repeat_log = log_file_name(dir.path(), "S01", cca.method, cca.window_s, cca.vote, true);
        assert_eq!(RunMetadata::path_for(&repeat_log), dir.path().join("S01_CCA_w1p5_v3_allch_1.meta.json"));
    }

    #[test]
    fn test_log_file_name_avoids_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let first = log_file_name(dir.path(), "S01", ScoringMethod::Fbcca, 1.5, 3, true);
        assert_eq!(first, dir.path().join("S01_FBCCA_w1p5_v3_allch.csv"));

        fs::write(&first, "").unwrap();
        let second = log_file_name(dir.path(), "S01", ScoringMethod::Fbcca, 1.5, 3, true);
        assert_eq!(second, dir.path().join("S01_FBCCA_w1p5_v3_allch_1.csv"));

        fs::write(&second, "").unwrap();
        let third = log_file_name(dir.path(), "S01", ScoringMethod::Fbcca, 1.5, 3, true);
        assert_eq!(third, dir.path().join("S01_FBCCA_w1p5_v3_allch_2.csv"));

        let subset = log_file_name(dir.path(), "S02", ScoringMethod::CcaPlus, 1.0, 1, false);
        assert_eq!(subset, dir.path().join("S02_CCA_w1p0_v1.csv"));
    }
}
