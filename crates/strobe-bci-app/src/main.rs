//! Strobe SSVEP decoder application
//!
//! Command-line front end for the online decoder. Resolves the EEG and
//! marker streams, writes the run metadata and decodes until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Decode a live LSL EEG stream with markers
//! strobe run --method fbcca --window 1.5 --vote 3
//!
//! # Pure prediction, no marker stream
//! strobe run --no-markers --chs 2,3,6,7
//!
//! # Simulated session with early stop and idle gating
//! strobe simulate --trials-per-class 5 --early-stop --idle
//!
//! # List LSL streams on the network
//! strobe streams --stream-type eeg
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use strobe_bci_core::{ScoringMethod, VoteResetPolicy};
use strobe_bci_native::bridge::{
    resolve_streams, LslInlet, MarkerSource, SampleSource, Stimulus, StreamType, SyntheticConfig, SyntheticSource,
    TrialSchedule,
};
use strobe_bci_native::recorder::log_file_name;
use strobe_bci_native::{ChannelSelection, DecisionRecorder, OnlineDecoder, PipelineConfig, RunMetadata};

/// Strobe online SSVEP decoder
#[derive(Parser, Debug)]
#[command(name = "strobe")]
#[command(author, version, about = "Online SSVEP decoder for flicker-stimulus BCIs", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a live LSL EEG stream
    Run {
        #[command(flatten)]
        decode: DecodeArgs,

        /// Do not look for a marker stream (pure prediction)
        #[arg(long)]
        no_markers: bool,

        /// Stream discovery timeout in seconds
        #[arg(long, default_value = "5.0")]
        resolve_timeout: f64,
    },

    /// Decode a synthetic session
    Simulate {
        #[command(flatten)]
        decode: DecodeArgs,

        #[command(flatten)]
        sim: SimulateArgs,
    },

    /// List LSL streams on the network
    Streams {
        /// Stream type: eeg or markers
        #[arg(short, long, default_value = "eeg")]
        stream_type: String,

        /// Discovery timeout in seconds
        #[arg(short, long, default_value = "2.0")]
        timeout: f64,
    },
}

/// Decoder settings. Flags override values read from `--config`.
#[derive(Args, Debug, Default)]
struct DecodeArgs {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scoring method: cca+ or fbcca
    #[arg(long, value_parser = parse_method)]
    method: Option<ScoringMethod>,

    /// Window length in seconds
    #[arg(long)]
    window: Option<f64>,

    /// Candidate frequencies (Hz), comma-separated
    #[arg(long, value_delimiter = ',')]
    freqs: Option<Vec<f64>>,

    /// Line-noise frequency (Hz), 0 disables the notch
    #[arg(long)]
    notch: Option<f64>,

    /// Channel indices (e.g. 2,3,6,7) or "all"
    #[arg(long)]
    chs: Option<ChannelSelection>,

    /// QC artifact for automatic channel selection (selected_chs.txt or QC JSON)
    #[arg(long)]
    auto_chs: Option<PathBuf>,

    /// Vote window size (1 disables voting)
    #[arg(long)]
    vote: Option<usize>,

    /// Vote history reset: never or trial
    #[arg(long, value_parser = parse_vote_reset)]
    vote_reset: Option<VoteResetPolicy>,

    /// Enable early stopping
    #[arg(long)]
    early_stop: bool,

    /// Early stop: minimum best score
    #[arg(long)]
    es_rmin: Option<f64>,

    /// Early stop: minimum margin
    #[arg(long)]
    es_margin: Option<f64>,

    /// Early stop: consecutive windows required
    #[arg(long)]
    es_patience: Option<u32>,

    /// Early stop: minimum time since trial start (s)
    #[arg(long)]
    es_min_window: Option<f64>,

    /// Enable the idle gate
    #[arg(long)]
    idle: bool,

    /// Idle gate: minimum best score
    #[arg(long)]
    idle_rmin: Option<f64>,

    /// Idle gate: minimum margin
    #[arg(long)]
    idle_margin: Option<f64>,

    /// Fine-tune each class frequency on its first labelled window
    #[arg(long)]
    fine_tune: bool,

    /// Decision log path (default: generated under --log-dir)
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Directory for generated log names
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Subject identifier used in generated log names
    #[arg(long)]
    subject: Option<String>,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Attend this frequency for the whole run instead of a trial schedule
    #[arg(long)]
    target: Option<f64>,

    /// Trials per candidate frequency
    #[arg(long, default_value = "5")]
    trials_per_class: usize,

    /// Sample rate (Hz)
    #[arg(long, default_value = "250.0")]
    rate: f64,

    /// Channel count
    #[arg(long, default_value = "8")]
    channels: usize,

    /// Noise standard deviation (µV)
    #[arg(long, default_value = "1.0")]
    noise: f64,

    /// Random seed
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Run length in seconds (default: the schedule's length)
    #[arg(long)]
    duration: Option<f64>,

    /// Pace samples at the nominal rate
    #[arg(long)]
    realtime: bool,
}

fn parse_method(s: &str) -> Result<ScoringMethod, String> {
    ScoringMethod::from_label(s).ok_or_else(|| format!("unknown method '{s}' (expected cca+ or fbcca)"))
}

fn parse_vote_reset(s: &str) -> Result<VoteResetPolicy, String> {
    match s.to_lowercase().as_str() {
        "never" => Ok(VoteResetPolicy::Never),
        "trial" | "on_trial_boundary" => Ok(VoteResetPolicy::OnTrialBoundary),
        _ => Err(format!("unknown vote reset policy '{s}' (expected never or trial)")),
    }
}

impl DecodeArgs {
    /// Merge flags over the file (or default) configuration and validate
    fn to_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to read configuration {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(method) = self.method {
            config.method = method;
        }
        if let Some(window) = self.window {
            config.window_s = window;
        }
        if let Some(freqs) = &self.freqs {
            config.freqs = freqs.clone();
        }
        if let Some(notch) = self.notch {
            config.notch_hz = notch;
        }
        if let Some(chs) = &self.chs {
            config.channels = chs.clone();
        }
        if let Some(path) = &self.auto_chs {
            config.qc_path = Some(path.clone());
        }
        if let Some(vote) = self.vote {
            config.vote = vote;
        }
        if let Some(policy) = self.vote_reset {
            config.vote_reset = policy;
        }

        config.early_stop.enabled |= self.early_stop;
        if let Some(r_min) = self.es_rmin {
            config.early_stop.r_min = r_min;
        }
        if let Some(margin) = self.es_margin {
            config.early_stop.margin_min = margin;
        }
        if let Some(patience) = self.es_patience {
            config.early_stop.patience = patience;
        }
        if let Some(min_window) = self.es_min_window {
            config.early_stop.min_window_s = min_window;
        }

        config.idle.enabled |= self.idle;
        if let Some(r_min) = self.idle_rmin {
            config.idle.r_min = r_min;
        }
        if let Some(margin) = self.idle_margin {
            config.idle.margin = margin;
        }

        config.fine_tune |= self.fine_tune;
        if let Some(path) = &self.log_path {
            config.output.log_path = Some(path.clone());
        }
        if let Some(dir) = &self.log_dir {
            config.output.log_dir = dir.clone();
        }
        if let Some(subject) = &self.subject {
            config.output.subject = subject.clone();
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Strobe decoder v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run { decode, no_markers, resolve_timeout } => run_live(&decode, no_markers, resolve_timeout),
        Commands::Simulate { decode, sim } => run_simulation(&decode, &sim),
        Commands::Streams { stream_type, timeout } => list_streams(&stream_type, timeout),
    }
}

/// Stop flag set by Ctrl-C
fn install_interrupt_handler() -> anyhow::Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    std::thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, stopping after the current window");
                    flag.store(true, Ordering::Relaxed);
                }
            });
        })
        .context("Failed to start interrupt handler")?;

    Ok(shutdown)
}

fn parse_stream_type(s: &str) -> anyhow::Result<StreamType> {
    match s.to_lowercase().as_str() {
        "eeg" => Ok(StreamType::Eeg),
        "markers" | "marker" => Ok(StreamType::Markers),
        other => anyhow::bail!("Unknown stream type '{other}' (expected eeg or markers)"),
    }
}

fn to_timeout(seconds: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(seconds).with_context(|| format!("Invalid timeout {seconds}"))
}

/// Decode a live LSL stream
fn run_live(args: &DecodeArgs, no_markers: bool, resolve_timeout: f64) -> anyhow::Result<()> {
    let config = args.to_config()?;
    let timeout = to_timeout(resolve_timeout)?;

    info!("Resolving EEG stream");
    let mut eeg = LslInlet::resolve_and_connect(StreamType::Eeg, timeout).context("No usable EEG stream")?;

    let mut markers = if no_markers {
        info!("Marker stream disabled, running class-only");
        None
    } else {
        match LslInlet::resolve_and_connect(StreamType::Markers, timeout) {
            Ok(inlet) => Some(inlet),
            Err(err) => {
                warn!(%err, "No marker stream; ground truth and latency unavailable for this run");
                None
            }
        }
    };

    let source = format!("lsl:{}", eeg.info().name);
    let shutdown = install_interrupt_handler()?;
    decode(
        config,
        &mut eeg,
        markers.as_mut().map(|m| m as &mut dyn MarkerSource),
        &source,
        &shutdown,
    )
}

/// Decode a synthetic session
fn run_simulation(args: &DecodeArgs, sim: &SimulateArgs) -> anyhow::Result<()> {
    let config = args.to_config()?;

    let stimulus = match sim.target {
        Some(target) => Stimulus::Constant(Some(target)),
        None => Stimulus::Scheduled(TrialSchedule::shuffled(&config.freqs, sim.trials_per_class, sim.seed)),
    };
    let synthetic = SyntheticConfig {
        sample_rate: sim.rate,
        channel_count: sim.channels,
        noise_std: sim.noise,
        seed: sim.seed,
        duration_s: sim.duration,
        realtime: sim.realtime,
        ..SyntheticConfig::default()
    };
    let mut source = SyntheticSource::new(synthetic, stimulus).context("Invalid simulation settings")?;
    let mut markers = source.marker_feed();
    info!(markers = markers.remaining(), "Simulated session ready");

    let shutdown = install_interrupt_handler()?;
    let has_schedule = sim.target.is_none();
    decode(
        config,
        &mut source,
        has_schedule.then_some(&mut markers as &mut dyn MarkerSource),
        "synthetic",
        &shutdown,
    )
}

/// Build the decoder, write metadata and run to completion
fn decode<S: SampleSource>(
    config: PipelineConfig,
    samples: &mut S,
    markers: Option<&mut dyn MarkerSource>,
    source: &str,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    let sample_rate = samples.sample_rate();
    let channel_count = samples.channel_count();
    let markers_available = markers.is_some();

    let mut decoder = OnlineDecoder::new(config, sample_rate, channel_count, markers_available)
        .context("Failed to build decoder")?;

    let config = decoder.config();
    let log_path = config.output.log_path.clone().unwrap_or_else(|| {
        log_file_name(
            &config.output.log_dir,
            &config.output.subject,
            config.method,
            config.window_s,
            config.vote,
            decoder.channels().is_none(),
        )
    });

    RunMetadata::new(config, sample_rate, channel_count, decoder.channels(), source, markers_available)
        .write(&RunMetadata::path_for(&log_path))
        .context("Failed to write run metadata")?;
    let mut recorder = DecisionRecorder::create(&log_path)
        .with_context(|| format!("Failed to create decision log {}", log_path.display()))?;

    decoder.run(samples, markers, &mut recorder, shutdown)?;

    info!(path = %log_path.display(), rows = recorder.rows(), "Decision log closed");
    if let Some(accuracy) = decoder.stats().accuracy() {
        info!("Window accuracy: {:.1}%", accuracy * 100.0);
    }
    Ok(())
}

/// List streams of one type
fn list_streams(stream_type: &str, timeout: f64) -> anyhow::Result<()> {
    let stream_type = parse_stream_type(stream_type)?;
    let streams = resolve_streams(stream_type, to_timeout(timeout)?)?;

    info!("Found {} {} stream(s):", streams.len(), stream_type.as_str());
    for stream in &streams {
        info!(
            "  {} ({} ch @ {} Hz) at {} [{}]",
            stream.name, stream.channel_count, stream.nominal_srate, stream.address, stream.source_id
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "strobe", "run", "--method", "FBCCA", "--window", "1.0", "--freqs", "10,12,15", "--chs", "2,3,6,7",
            "--vote", "5", "--early-stop", "--es-patience", "4", "--no-markers",
        ])
        .unwrap();
        let Commands::Run { decode, no_markers, .. } = cli.command else { panic!("expected run") };
        assert!(no_markers);

        let config = decode.to_config().unwrap();
        assert_eq!(config.method, ScoringMethod::Fbcca);
        assert_eq!(config.window_s, 1.0);
        assert_eq!(config.freqs, vec![10.0, 12.0, 15.0]);
        assert_eq!(config.channels, ChannelSelection::Indices(vec![2, 3, 6, 7]));
        assert_eq!(config.vote, 5);
        assert!(config.early_stop.enabled);
        assert_eq!(config.early_stop.patience, 4);
        assert!(!config.idle.enabled);
    }

    #[test]
    fn test_invalid_flags_rejected() {
        assert!(Cli::try_parse_from(["strobe", "run", "--method", "svm"]).is_err());
        assert!(Cli::try_parse_from(["strobe", "run", "--vote-reset", "sometimes"]).is_err());

        let cli = Cli::try_parse_from(["strobe", "simulate", "--vote", "0"]).unwrap();
        let Commands::Simulate { decode, .. } = cli.command else { panic!("expected simulate") };
        assert!(decode.to_config().is_err());
    }

    #[test]
    fn test_default_config_matches_library() {
        let config = DecodeArgs::default().to_config().unwrap();
        assert_eq!(config, PipelineConfig::default());
    }
}
