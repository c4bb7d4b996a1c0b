//! Mutable decoder state
//!
//! Everything that survives from one window to the next lives in
//! [`SessionState`]: the current trial, the vote history and the calibration
//! cache. The online loop owns one instance and hands it to each component.

use std::collections::VecDeque;

use strobe_bci_core::{majority_vote, same_frequency, MarkerEvent, VoteResetPolicy};

use super::calibrator::CalibrationCache;

// ============================================================================
// Trial State
// ============================================================================

/// Per-trial bookkeeping driven by markers and the early-stop logic.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrialState {
    /// Timestamp of the last `TRIAL_START`
    pub start_time: Option<f64>,
    /// Ground-truth frequency; absent during rest
    pub truth_hz: Option<f64>,
    /// Early stop has fired this trial
    pub locked: bool,
    /// Raw prediction at the moment of locking
    pub locked_prediction: Option<f64>,
    /// Prediction timestamp at the moment of locking
    pub locked_time: Option<f64>,
    consecutive: u32,
    consecutive_label: Option<f64>,
}

impl TrialState {
    /// Apply a marker. Returns true for trial boundaries.
    ///
    /// `TRIAL_START` resets everything and takes the ground truth from the
    /// payload. `TRIAL_END` clears the lock and counter and drops the
    /// ground truth; the start time is kept so latency stays defined.
    pub fn apply_marker(&mut self, event: &MarkerEvent, timestamp: f64) -> bool {
        match *event {
            MarkerEvent::TrialStart { frequency_hz } => {
                *self = Self {
                    start_time: Some(timestamp),
                    truth_hz: frequency_hz,
                    ..Self::default()
                };
                true
            }
            MarkerEvent::TrialEnd { .. } => {
                self.clear_lock();
                self.truth_hz = None;
                true
            }
            MarkerEvent::Cue { .. } | MarkerEvent::RestStart | MarkerEvent::RestEnd => false,
        }
    }

    fn clear_lock(&mut self) {
        self.locked = false;
        self.locked_prediction = None;
        self.locked_time = None;
        self.consecutive = 0;
        self.consecutive_label = None;
    }

    /// Feed this window's raw winner to the consecutive-match counter and
    /// return the updated count.
    pub fn observe(&mut self, raw_prediction: f64) -> u32 {
        match self.consecutive_label {
            Some(prev) if same_frequency(prev, raw_prediction) => {
                self.consecutive = self.consecutive.saturating_add(1);
            }
            _ => {
                self.consecutive_label = Some(raw_prediction);
                self.consecutive = 1;
            }
        }
        self.consecutive
    }

    /// Current consecutive-match count
    #[must_use]
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Lock the trial on `prediction` at `timestamp`. Returns false if the
    /// trial was already locked.
    pub fn lock(&mut self, prediction: f64, timestamp: f64) -> bool {
        if self.locked {
            return false;
        }
        self.locked = true;
        self.locked_prediction = Some(prediction);
        self.locked_time = Some(timestamp);
        true
    }

    /// Seconds since trial start, if known
    #[must_use]
    pub fn elapsed(&self, now: f64) -> Option<f64> {
        self.start_time.map(|start| now - start)
    }
}

// ============================================================================
// Vote History
// ============================================================================

/// Bounded history of raw per-window winners.
#[derive(Clone, Debug)]
pub struct VoteHistory {
    capacity: usize,
    entries: VecDeque<f64>,
}

impl VoteHistory {
    /// History of at most `capacity` entries (a capacity of one disables
    /// voting; zero is treated as one)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, entries: VecDeque::with_capacity(capacity) }
    }

    /// Append a raw winner, evicting the oldest past capacity
    pub fn push(&mut self, frequency_hz: f64) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(frequency_hz);
    }

    /// Majority label (ties to the smallest frequency), `None` when empty
    #[must_use]
    pub fn majority(&self) -> Option<f64> {
        let (front, back) = self.entries.as_slices();
        if back.is_empty() {
            majority_vote(front)
        } else {
            let joined: Vec<f64> = self.entries.iter().copied().collect();
            majority_vote(&joined)
        }
    }

    /// Entries oldest first
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().copied()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capacity K
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Decoder state carried across windows.
#[derive(Clone, Debug)]
pub struct SessionState {
    /// Current trial
    pub trial: TrialState,
    /// Raw-winner history for voting
    pub votes: VoteHistory,
    /// Per-class frequency calibration
    pub calibration: CalibrationCache,
    vote_reset: VoteResetPolicy,
}

impl SessionState {
    /// Fresh state for `classes` classes with a vote window of `vote`
    #[must_use]
    pub fn new(classes: usize, vote: usize, vote_reset: VoteResetPolicy) -> Self {
        Self {
            trial: TrialState::default(),
            votes: VoteHistory::new(vote),
            calibration: CalibrationCache::new(classes),
            vote_reset,
        }
    }

    /// Apply a parsed marker to the trial, clearing votes on trial
    /// boundaries when the reset policy asks for it.
    pub fn apply_marker(&mut self, event: &MarkerEvent, timestamp: f64) {
        let boundary = self.trial.apply_marker(event, timestamp);
        if boundary && self.vote_reset == VoteResetPolicy::OnTrialBoundary {
            self.votes.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(f: Option<f64>) -> MarkerEvent {
        MarkerEvent::TrialStart { frequency_hz: f }
    }

    #[test]
    fn test_trial_start_resets_and_sets_truth() {
        let mut trial = TrialState::default();
        trial.observe(12.0);
        assert!(trial.lock(12.0, 3.0));

        assert!(trial.apply_marker(&start(Some(15.0)), 10.0));
        assert_eq!(trial.start_time, Some(10.0));
        assert_eq!(trial.truth_hz, Some(15.0));
        assert!(!trial.locked);
        assert_eq!(trial.locked_prediction, None);
        assert_eq!(trial.consecutive(), 0);
    }

    #[test]
    fn test_trial_start_without_frequency() {
        let mut trial = TrialState::default();
        trial.apply_marker(&start(None), 1.0);
        assert_eq!(trial.truth_hz, None);
        assert_eq!(trial.start_time, Some(1.0));
    }

    #[test]
    fn test_trial_end_clears_lock_and_truth() {
        let mut trial = TrialState::default();
        trial.apply_marker(&start(Some(12.0)), 1.0);
        trial.observe(12.0);
        trial.lock(12.0, 2.0);

        assert!(trial.apply_marker(&MarkerEvent::TrialEnd { frequency_hz: Some(12.0) }, 5.0));
        assert_eq!(trial.truth_hz, None);
        assert!(!trial.locked);
        assert_eq!(trial.locked_time, None);
        assert_eq!(trial.consecutive(), 0);
        assert_eq!(trial.start_time, Some(1.0));
    }

    #[test]
    fn test_informational_markers_ignored() {
        let mut trial = TrialState::default();
        trial.apply_marker(&start(Some(12.0)), 1.0);
        let before = trial.clone();
        assert!(!trial.apply_marker(&MarkerEvent::Cue { frequency_hz: Some(15.0) }, 2.0));
        assert!(!trial.apply_marker(&MarkerEvent::RestStart, 3.0));
        assert!(!trial.apply_marker(&MarkerEvent::RestEnd, 4.0));
        assert_eq!(trial, before);
    }

    #[test]
    fn test_consecutive_counter() {
        let mut trial = TrialState::default();
        assert_eq!(trial.observe(12.0), 1);
        assert_eq!(trial.observe(12.0), 2);
        assert_eq!(trial.observe(15.0), 1);
        assert_eq!(trial.observe(15.0), 2);
        assert_eq!(trial.observe(15.0), 3);
    }

    #[test]
    fn test_lock_once() {
        let mut trial = TrialState::default();
        assert!(trial.lock(12.0, 1.0));
        assert!(!trial.lock(15.0, 2.0));
        assert_eq!(trial.locked_prediction, Some(12.0));
        assert_eq!(trial.locked_time, Some(1.0));
    }

    #[test]
    fn test_vote_history_evicts_oldest() {
        let mut votes = VoteHistory::new(3);
        for f in [10.0, 12.0, 12.0, 15.0, 15.0] {
            votes.push(f);
        }
        assert_eq!(votes.iter().collect::<Vec<_>>(), vec![12.0, 15.0, 15.0]);
        assert_eq!(votes.majority(), Some(15.0));
    }

    #[test]
    fn test_vote_history_tie_smallest() {
        let mut votes = VoteHistory::new(4);
        for f in [15.0, 12.0, 15.0, 12.0] {
            votes.push(f);
        }
        assert_eq!(votes.majority(), Some(12.0));
    }

    #[test]
    fn test_vote_of_one_is_raw() {
        let mut votes = VoteHistory::new(1);
        votes.push(10.0);
        votes.push(20.0);
        assert_eq!(votes.majority(), Some(20.0));
        assert_eq!(VoteHistory::new(0).capacity(), 1);
    }

    #[test]
    fn test_session_vote_reset_policy() {
        let mut keep = SessionState::new(4, 3, VoteResetPolicy::Never);
        keep.votes.push(12.0);
        keep.apply_marker(&start(Some(12.0)), 1.0);
        assert_eq!(keep.votes.len(), 1);

        let mut reset = SessionState::new(4, 3, VoteResetPolicy::OnTrialBoundary);
        reset.votes.push(12.0);
        reset.apply_marker(&MarkerEvent::RestStart, 1.0);
        assert_eq!(reset.votes.len(), 1);
        reset.apply_marker(&MarkerEvent::TrialEnd { frequency_hz: None }, 2.0);
        assert!(reset.votes.is_empty());
    }
}
