//! Sliding time-window primitive behind admission control.

use std::collections::VecDeque;
use tokio::time::Instant;

/// Bounded, time-ordered history of recent event timestamps for one key.
///
/// The cap is a memory bound only; correctness comes from pruning entries
/// older than the policy period before every admission decision.
pub struct TimeWindowCounter {
    history: VecDeque<Instant>,
    cap: usize,
}

impl TimeWindowCounter {
    /// Create an empty counter with the given capacity.
    pub fn new(cap: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(cap.min(64)),
            cap,
        }
    }

    /// Drop all timestamps at or before `cutoff`.
    pub fn prune(&mut self, cutoff: Instant) {
        while self.history.front().is_some_and(|&t| t <= cutoff) {
            self.history.pop_front();
        }
    }

    /// Record a new event, displacing the oldest entry when at capacity.
    pub fn record(&mut self, at: Instant) {
        if self.history.len() >= self.cap {
            self.history.pop_front();
        }
        self.history.push_back(at);
    }

    /// The oldest timestamp still in the window.
    pub fn oldest(&self) -> Option<Instant> {
        self.history.front().copied()
    }

    /// Number of events currently in the window.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether the window holds no events.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
