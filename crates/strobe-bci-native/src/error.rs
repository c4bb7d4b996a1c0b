//! Error types for host-side decoding
//!
//! One `thiserror` enum per subsystem with a matching `Result` alias, and a
//! top-level [`PipelineError`] that the online loop propagates.

use std::path::PathBuf;

use strobe_bci_core::ParameterError;
use thiserror::Error;

/// Ring buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Fewer samples have been written than the requested window
    #[error("Insufficient data: have {have} samples, need {need}")]
    InsufficientData {
        /// Samples written so far (saturating at capacity)
        have: usize,
        /// Samples requested
        need: usize,
    },

    /// Requested window is longer than the buffer can hold
    #[error("Window of {window} samples exceeds buffer capacity {capacity}")]
    WindowTooLarge {
        /// Requested window length
        window: usize,
        /// Buffer capacity
        capacity: usize,
    },

    /// A sample does not carry one value per channel
    #[error("Channel mismatch: buffer has {expected} channels, sample has {got}")]
    ChannelMismatch {
        /// Channels the buffer was created with
        expected: usize,
        /// Values in the offending sample
        got: usize,
    },
}

/// Filter design errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    /// Band edges are not ordered inside `(0, nyquist)`
    #[error("Invalid band {low_hz}-{high_hz} Hz for nyquist {nyquist_hz} Hz")]
    InvalidBand {
        /// Lower edge (Hz)
        low_hz: f64,
        /// Upper edge (Hz)
        high_hz: f64,
        /// Nyquist frequency of the stream (Hz)
        nyquist_hz: f64,
    },

    /// Filter order must be at least one
    #[error("Invalid filter order {0}")]
    InvalidOrder(usize),
}

/// Canonical correlation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CcaError {
    /// Signal and reference have different sample counts
    #[error("Shape mismatch: signal has {signal_rows} samples, reference has {reference_rows}")]
    ShapeMismatch {
        /// Rows of the signal matrix
        signal_rows: usize,
        /// Rows of the reference matrix
        reference_rows: usize,
    },

    /// A matrix has no variance left after centering
    #[error("Degenerate {which} matrix: rank zero after centering")]
    Degenerate {
        /// Which side of the fit ("signal" or "reference")
        which: &'static str,
    },

    /// Singular value decomposition did not converge
    #[error("Singular value decomposition did not converge")]
    NoConvergence,

    /// The correlation came out NaN or infinite
    #[error("Non-finite correlation")]
    NonFinite,
}

/// Sample and marker source errors
#[derive(Error, Debug)]
pub enum SourceError {
    /// Discovery found nothing of the requested type
    #[error("No LSL stream of type '{stream_type}' found")]
    NoStreamsFound {
        /// Requested stream type
        stream_type: String,
    },

    /// Network I/O error
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream-info header could not be parsed
    #[error("Invalid stream header: {0}")]
    InvalidHeader(String),

    /// The remote end closed the connection
    #[error("Stream disconnected")]
    Disconnected,

    /// The stream carries a different channel format than requested
    #[error("Stream '{name}' carries {found} data, expected {expected}")]
    FormatMismatch {
        /// Stream name
        name: String,
        /// Format found in the header
        found: &'static str,
        /// Format the caller needs
        expected: &'static str,
    },

    /// A finite source has delivered all of its samples
    #[error("End of stream")]
    EndOfStream,
}

/// Decision output errors
#[derive(Error, Debug)]
pub enum RecorderError {
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A numeric threshold failed validation
    #[error(transparent)]
    Parameter(#[from] ParameterError),

    /// A parameter is invalid
    #[error("Invalid {parameter}: {reason}")]
    Invalid {
        /// Parameter name
        parameter: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// The channel-selection artifact could not be used
    #[error("QC artifact {}: {reason}", path.display())]
    QcArtifact {
        /// Artifact path
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { parameter, reason: reason.into() }
    }
}

/// Errors surfaced by the online decoding loop
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Ring buffer error
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Filter design error
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Correlation error
    #[error(transparent)]
    Cca(#[from] CcaError),

    /// Source error
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Recorder error
    #[error(transparent)]
    Recorder(#[from] RecorderError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for buffer operations
pub type BufferResult<T> = Result<T, BufferError>;

/// Result type for filter design
pub type FilterResult<T> = Result<T, FilterError>;

/// Result type for correlation fits
pub type CcaResult<T> = Result<T, CcaError>;

/// Result type for sources
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for the recorder
pub type RecorderResult<T> = Result<T, RecorderError>;

/// Result type for configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for the pipeline
pub type PipelineResult<T> = Result<T, PipelineError>;
