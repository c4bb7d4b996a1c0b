//! Pull interfaces for sample and marker feeds

use std::time::Duration;

use crate::error::SourceResult;

/// A multichannel sample feed with a fixed rate and width.
pub trait SampleSource {
    /// Nominal sample rate (Hz)
    fn sample_rate(&self) -> f64;

    /// Values per sample
    fn channel_count(&self) -> usize;

    /// Pull every sample that arrives within `timeout` (possibly none).
    /// `chunk[i][c]` is sample `i`, channel `c`, in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`](crate::error::SourceError) on disconnect or
    /// I/O failure, and [`SourceError::EndOfStream`](crate::error::SourceError::EndOfStream)
    /// once a finite source is exhausted.
    fn pull_chunk(&mut self, timeout: Duration) -> SourceResult<Vec<Vec<f64>>>;

    /// Current time in the clock domain shared with the marker feed (seconds)
    fn clock(&self) -> f64;
}

/// A feed of timestamped text markers.
pub trait MarkerSource {
    /// Pull the next marker as `(payload, timestamp)`, or `None` if nothing
    /// arrives within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`](crate::error::SourceError) on disconnect or
    /// I/O failure.
    fn pull_marker(&mut self, timeout: Duration) -> SourceResult<Option<(String, f64)>>;
}
