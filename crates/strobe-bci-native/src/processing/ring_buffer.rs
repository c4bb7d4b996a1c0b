//! Fixed-capacity circular sample store
//!
//! Holds the most recent `capacity` samples per channel. Older samples are
//! overwritten silently. Windows are extracted in chronological order
//! regardless of where the write cursor sits.

use nalgebra::DMatrix;

use crate::error::{BufferError, BufferResult};

/// Circular multichannel buffer.
#[derive(Clone, Debug)]
pub struct RingBuffer {
    /// Per-channel contiguous storage, each `capacity` long
    channels: Vec<Vec<f64>>,
    capacity: usize,
    /// Next write position, always `< capacity`
    head: usize,
    /// Samples written since creation, saturating at `capacity`
    filled: usize,
}

impl RingBuffer {
    /// Create a buffer holding `capacity` samples of `channel_count` channels.
    ///
    /// A zero capacity is bumped to one so the cursor invariant holds.
    #[must_use]
    pub fn new(capacity: usize, channel_count: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            channels: vec![vec![0.0; capacity]; channel_count],
            capacity,
            head: 0,
            filled: 0,
        }
    }

    /// Create a buffer sized for `window` samples (capacity `2 * window`).
    #[must_use]
    pub fn for_window(window: usize, channel_count: usize) -> Self {
        Self::new(window.saturating_mul(2), channel_count)
    }

    /// Buffer capacity in samples
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of channels
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Current write cursor
    #[must_use]
    pub fn head(&self) -> usize {
        self.head
    }

    /// Samples available for extraction (saturates at capacity)
    #[must_use]
    pub fn len(&self) -> usize {
        self.filled
    }

    /// True before the first sample is written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Raw storage of one channel, in slot order (not chronological)
    #[must_use]
    pub fn raw_channel(&self, channel: usize) -> Option<&[f64]> {
        self.channels.get(channel).map(Vec::as_slice)
    }

    /// Append a chunk of samples (`chunk[i][c]` is sample `i`, channel `c`).
    ///
    /// A chunk at least `capacity` long replaces the contents with its last
    /// `capacity` samples and resets the cursor to zero. Shorter chunks are
    /// written at the cursor, wrapping to the start when they cross the end.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::ChannelMismatch`] if any sample has the wrong
    /// width. The buffer is left untouched in that case.
    pub fn append(&mut self, chunk: &[Vec<f64>]) -> BufferResult<()> {
        let expected = self.channels.len();
        if let Some(bad) = chunk.iter().find(|s| s.len() != expected) {
            return Err(BufferError::ChannelMismatch { expected, got: bad.len() });
        }

        let n = chunk.len();
        if n == 0 {
            return Ok(());
        }

        if n >= self.capacity {
            let tail = &chunk[n - self.capacity..];
            for (c, storage) in self.channels.iter_mut().enumerate() {
                for (slot, sample) in storage.iter_mut().zip(tail) {
                    *slot = sample[c];
                }
            }
            self.head = 0;
            self.filled = self.capacity;
            return Ok(());
        }

        // Tail write from the cursor, then wrap write from slot zero
        let first = n.min(self.capacity - self.head);
        let (to_end, wrapped) = chunk.split_at(first);
        for (c, storage) in self.channels.iter_mut().enumerate() {
            for (slot, sample) in storage[self.head..self.head + first].iter_mut().zip(to_end) {
                *slot = sample[c];
            }
            for (slot, sample) in storage[..wrapped.len()].iter_mut().zip(wrapped) {
                *slot = sample[c];
            }
        }

        self.head = (self.head + n) % self.capacity;
        self.filled = (self.filled + n).min(self.capacity);
        Ok(())
    }

    /// Extract the last `window` samples as a `window × channels` matrix in
    /// chronological order.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::WindowTooLarge`] if `window` exceeds the
    /// capacity, or [`BufferError::InsufficientData`] before `window`
    /// samples have been written.
    pub fn extract_window(&self, window: usize) -> BufferResult<DMatrix<f64>> {
        if window > self.capacity {
            return Err(BufferError::WindowTooLarge { window, capacity: self.capacity });
        }
        if self.filled < window {
            return Err(BufferError::InsufficientData { have: self.filled, need: window });
        }

        let mut out = DMatrix::zeros(window, self.channels.len());
        for (c, storage) in self.channels.iter().enumerate() {
            let (older, newer) = if self.head >= window {
                (&storage[self.head - window..self.head], &storage[..0])
            } else {
                (&storage[self.capacity - (window - self.head)..], &storage[..self.head])
            };
            for (dst, src) in out.column_mut(c).iter_mut().zip(older.iter().chain(newer)) {
                *dst = *src;
            }
        }
        Ok(out)
    }

    /// Forget all samples
    pub fn clear(&mut self) {
        for storage in &mut self.channels {
            storage.fill(0.0);
        }
        self.head = 0;
        self.filled = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================
