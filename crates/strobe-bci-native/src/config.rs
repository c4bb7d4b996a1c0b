//! Pipeline configuration
//!
//! [`PipelineConfig`] gathers every knob of the online decoder. It can be
//! built from CLI flags or read from a JSON file, and must pass
//! [`PipelineConfig::validate`] before a decoder is constructed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strobe_bci_core::{same_frequency, EarlyStopConfig, IdleGateConfig, ScoringMethod, VoteResetPolicy};

use crate::decoding::CalibrationEntry;
use crate::error::{ConfigError, ConfigResult};

// ============================================================================
// Channel Selection
// ============================================================================

/// Which stream channels feed the decoder
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSelection {
    /// Every channel of the stream
    #[default]
    All,
    /// Zero-based channel indices, in the given order
    Indices(Vec<usize>),
}

impl ChannelSelection {
    /// True for [`ChannelSelection::All`]
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl FromStr for ChannelSelection {
    type Err = String;

    /// `"all"` (or an empty string) selects every channel; otherwise a
    /// comma-separated index list such as `"2,3,6,7"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        parse_index_list(s).map(Self::Indices)
    }
}

impl fmt::Display for ChannelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Indices(indices) => {
                for (i, index) in indices.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{index}")?;
                }
                Ok(())
            }
        }
    }
}

fn parse_index_list(s: &str) -> Result<Vec<usize>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<usize>().map_err(|e| format!("bad channel index '{t}': {e}")))
        .collect()
}

/// Read a channel selection from a QC artifact.
///
/// `.json` files must carry a `topk` array of indices; anything else is read
/// as a comma-separated index list (`selected_chs.txt`).
///
/// # Errors
///
/// Returns [`ConfigError::QcArtifact`] if the file is unreadable, malformed
/// or selects no channel.
pub fn load_qc_selection(path: &Path) -> ConfigResult<Vec<usize>> {
    let qc_error = |reason: String| ConfigError::QcArtifact { path: path.to_path_buf(), reason };

    let text = std::fs::read_to_string(path).map_err(|e| qc_error(e.to_string()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let indices = if is_json {
        #[derive(Deserialize)]
        struct QcReport {
            topk: Vec<usize>,
        }
        let report: QcReport = serde_json::from_str(&text).map_err(|e| qc_error(e.to_string()))?;
        report.topk
    } else {
        parse_index_list(&text).map_err(qc_error)?
    };

    if indices.is_empty() {
        return Err(qc_error("selects no channel".to_string()));
    }
    Ok(indices)
}

// ============================================================================
// Output
// ============================================================================

/// Where decision records go
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Explicit CSV path; generated under `log_dir` when absent
    pub log_path: Option<PathBuf>,
    /// Directory for generated log names
    pub log_dir: PathBuf,
    /// Subject identifier used in generated log names
    pub subject: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            log_dir: PathBuf::from("logs"),
            subject: "S01".to_string(),
        }
    }
}

// ============================================================================
// Pipeline Configuration
// ============================================================================

/// Online decoder configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Scoring strategy
    pub method: ScoringMethod,
    /// Analysis window length (seconds)
    pub window_s: f64,
    /// Candidate stimulus frequencies (Hz), in class order
    pub freqs: Vec<f64>,
    /// Line-noise frequency (Hz); 0 disables the notch
    pub notch_hz: f64,
    /// Channel subset
    pub channels: ChannelSelection,
    /// QC artifact for automatic channel selection; overrides `channels`
    pub qc_path: Option<PathBuf>,
    /// Vote window size K (1 disables voting)
    pub vote: usize,
    /// Whether the vote history is cleared at trial boundaries
    pub vote_reset: VoteResetPolicy,
    /// Early-stop criteria
    pub early_stop: EarlyStopConfig,
    /// Idle gate thresholds
    pub idle: IdleGateConfig,
    /// Per-class frequency fine-tuning
    pub fine_tune: bool,
    /// Tuned frequencies carried over from a previous run
    pub calibration: Vec<CalibrationEntry>,
    /// Decision output
    pub output: OutputConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            method: ScoringMethod::CcaPlus,
            window_s: 1.5,
            freqs: vec![10.0, 12.0, 15.0, 20.0],
            notch_hz: 50.0,
            channels: ChannelSelection::All,
            qc_path: None,
            vote: 3,
            vote_reset: VoteResetPolicy::Never,
            early_stop: EarlyStopConfig::default(),
            idle: IdleGateConfig::default(),
            fine_tune: false,
            calibration: Vec::new(),
            output: OutputConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a configuration from a JSON file. Missing fields take their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Json`].
    pub fn from_json_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Check stream-independent parameters.
    ///
    /// # Errors
    ///
    /// Returns the first invalid parameter found.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.window_s.is_finite() && self.window_s > 0.0) {
            return Err(ConfigError::invalid("window_s", "must be a positive number of seconds"));
        }
        if self.freqs.is_empty() {
            return Err(ConfigError::invalid("freqs", "at least one candidate frequency is required"));
        }
        if let Some(bad) = self.freqs.iter().find(|f| !(f.is_finite() && **f > 0.0)) {
            return Err(ConfigError::invalid("freqs", format!("{bad} is not a positive frequency")));
        }
        for (i, a) in self.freqs.iter().enumerate() {
            if self.freqs[i + 1..].iter().any(|b| same_frequency(*a, *b)) {
                return Err(ConfigError::invalid("freqs", format!("{a} Hz is listed twice")));
            }
        }
        if !(self.notch_hz.is_finite() && self.notch_hz >= 0.0) {
            return Err(ConfigError::invalid("notch_hz", "must be >= 0 (0 disables)"));
        }
        if self.vote == 0 {
            return Err(ConfigError::invalid("vote", "must be at least 1"));
        }
        if let ChannelSelection::Indices(indices) = &self.channels {
            if indices.is_empty() {
                return Err(ConfigError::invalid("channels", "empty channel list"));
            }
        }
        if let Some(bad) = self
            .calibration
            .iter()
            .find(|e| !(e.nominal_hz.is_finite() && e.tuned_hz.is_finite() && e.tuned_hz > 0.0))
        {
            return Err(ConfigError::invalid(
                "calibration",
                format!("bad entry {} -> {}", bad.nominal_hz, bad.tuned_hz),
            ));
        }
        self.idle.validate()?;
        self.early_stop.validate()?;
        Ok(())
    }

    /// Window length in samples at `sample_rate`
    #[must_use]
    pub fn window_samples(&self, sample_rate: f64) -> usize {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n = (self.window_s * sample_rate).round().max(0.0) as usize;
        n
    }

    /// Check parameters that depend on the stream.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a non-positive rate, a window
    /// shorter than two samples, or a candidate at or above nyquist.
    pub fn validate_for_stream(&self, sample_rate: f64) -> ConfigResult<()> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(ConfigError::invalid("sample_rate", format!("{sample_rate} Hz is not usable")));
        }
        if self.window_samples(sample_rate) < 2 {
            return Err(ConfigError::invalid("window_s", "shorter than two samples"));
        }
        let nyquist = sample_rate / 2.0;
        if let Some(bad) = self.freqs.iter().find(|&&f| f >= nyquist) {
            return Err(ConfigError::invalid("freqs", format!("{bad} Hz is at or above nyquist")));
        }
        Ok(())
    }

    /// Channel indices to decode, `None` for all channels. A QC artifact
    /// takes precedence over `channels`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the artifact cannot be used or an index
    /// is outside `0..channel_count`.
    pub fn resolve_channels(&self, channel_count: usize) -> ConfigResult<Option<Vec<usize>>> {
        let selection = match &self.qc_path {
            Some(path) => Some(load_qc_selection(path)?),
            None => match &self.channels {
                ChannelSelection::All => None,
                ChannelSelection::Indices(indices) => Some(indices.clone()),
            },
        };
        if let Some(indices) = &selection {
            if let Some(bad) = indices.iter().find(|&&i| i >= channel_count) {
                return Err(ConfigError::invalid(
                    "channels",
                    format!("index {bad} outside a {channel_count}-channel stream"),
                ));
            }
        }
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.window_samples(250.0), 375);
        assert_eq!(config.vote, 3);
        assert_eq!(config.method, ScoringMethod::CcaPlus);
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        let cases: Vec<(&str, Box<dyn Fn(&mut PipelineConfig)>)> = vec![
            ("window_s", Box::new(|c: &mut PipelineConfig| c.window_s = 0.0)),
            ("window_s", Box::new(|c: &mut PipelineConfig| c.window_s = f64::NAN)),
            ("freqs", Box::new(|c: &mut PipelineConfig| c.freqs.clear())),
            ("freqs", Box::new(|c: &mut PipelineConfig| c.freqs = vec![12.0, 15.0, 12.0])),
            ("freqs", Box::new(|c: &mut PipelineConfig| c.freqs = vec![-1.0])),
            ("notch_hz", Box::new(|c: &mut PipelineConfig| c.notch_hz = -50.0)),
            ("vote", Box::new(|c: &mut PipelineConfig| c.vote = 0)),
            ("channels", Box::new(|c: &mut PipelineConfig| c.channels = ChannelSelection::Indices(vec![]))),
        ];
        for (name, mutate) in cases {
            let mut config = PipelineConfig::default();
            mutate(&mut config);
            match config.validate() {
                Err(ConfigError::Invalid { parameter, .. }) => assert_eq!(parameter, name),
                other => panic!("{name}: expected Invalid, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_validate_rejects_nan_thresholds() {
        let mut config = PipelineConfig::default();
        config.idle.r_min = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::Parameter(_))));

        let mut config = PipelineConfig::default();
        config.early_stop.patience = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Parameter(_))));
    }

    #[test]
    fn test_validate_for_stream() {
        let config = PipelineConfig::default();
        config.validate_for_stream(250.0).unwrap();
        assert!(config.validate_for_stream(30.0).is_err());
        assert!(config.validate_for_stream(0.0).is_err());
    }

    #[test]
    fn test_channel_selection_parsing() {
        assert_eq!("all".parse::<ChannelSelection>(), Ok(ChannelSelection::All));
        assert_eq!("".parse::<ChannelSelection>(), Ok(ChannelSelection::All));
        assert_eq!(
            "2, 3,6,7".parse::<ChannelSelection>(),
            Ok(ChannelSelection::Indices(vec![2, 3, 6, 7]))
        );
        assert!("2,x".parse::<ChannelSelection>().is_err());
        assert_eq!(ChannelSelection::Indices(vec![1, 4]).to_string(), "1,4");
    }

    #[test]
    fn test_resolve_channels() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.resolve_channels(8).unwrap(), None);

        config.channels = ChannelSelection::Indices(vec![0, 7]);
        assert_eq!(config.resolve_channels(8).unwrap(), Some(vec![0, 7]));
        assert!(config.resolve_channels(4).is_err());
    }

    #[test]
    fn test_qc_artifact_text_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let txt = dir.path().join("selected_chs.txt");
        std::fs::write(&txt, "2,3,6,7\n").unwrap();
        assert_eq!(load_qc_selection(&txt).unwrap(), vec![2, 3, 6, 7]);

        let json = dir.path().join("qc.json");
        let mut f = std::fs::File::create(&json).unwrap();
        writeln!(f, r#"{{"topk": [1, 5], "snr": [0.1, 0.2]}}"#).unwrap();
        assert_eq!(load_qc_selection(&json).unwrap(), vec![1, 5]);

        let mut config = PipelineConfig::default();
        config.channels = ChannelSelection::Indices(vec![0]);
        config.qc_path = Some(json);
        assert_eq!(config.resolve_channels(8).unwrap(), Some(vec![1, 5]));
    }

    #[test]
    fn test_qc_artifact_errors() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("selected_chs.txt");
        std::fs::write(&empty, "\n").unwrap();
        assert!(matches!(load_qc_selection(&empty), Err(ConfigError::QcArtifact { .. })));

        let missing = dir.path().join("missing.json");
        assert!(matches!(load_qc_selection(&missing), Err(ConfigError::QcArtifact { .. })));
    }

    #[test]
    fn test_json_config_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{"method": "Fbcca", "window_s": 2.0, "channels": {"indices": [0, 1]},
                "idle": {"enabled": true}, "vote_reset": "on_trial_boundary"}"#,
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.method, ScoringMethod::Fbcca);
        assert_eq!(config.window_s, 2.0);
        assert_eq!(config.channels, ChannelSelection::Indices(vec![0, 1]));
        assert!(config.idle.enabled);
        assert_eq!(config.idle.r_min, 0.5);
        assert_eq!(config.vote_reset, VoteResetPolicy::OnTrialBoundary);
        assert_eq!(config.freqs, vec![10.0, 12.0, 15.0, 20.0]);
    }
}
