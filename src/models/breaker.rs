//! Circuit breaker over recent iteration outcomes.

use std::collections::VecDeque;

/// Fixed-size sliding window of iteration outcomes plus a failure
/// threshold.
///
/// The breaker is open iff the most recent `threshold` recorded outcomes
/// are all failures. A success clears the window, closing the breaker
/// immediately.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    window: usize,
    threshold: usize,
    outcomes: VecDeque<bool>,
}

impl CircuitBreaker {
    /// Create a breaker with the given window size and failure threshold.
    /// `window` must be >= `threshold` >= 1 (validated at config time).
    #[must_use]
    pub fn new(window: usize, threshold: usize) -> Self {
        Self {
            window,
            threshold,
            outcomes: VecDeque::with_capacity(window),
        }
    }

    /// Record one iteration outcome. A success resets the window.
    pub fn record(&mut self, success: bool) {
        if success {
            self.outcomes.clear();
            return;
        }
        if self.outcomes.len() == self.window {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    /// True iff the most recent `threshold` recorded outcomes are all
    /// failures.
    #[must_use]
    pub fn is_open(&self) -> bool {
        if self.outcomes.len() < self.threshold {
            return false;
        }
        self.outcomes
            .iter()
            .rev()
            .take(self.threshold)
            .all(|ok| !ok)
    }

    /// Number of consecutive trailing failures.
    #[must_use]
    pub fn consecutive_failures(&self) -> usize {
        self.outcomes.iter().rev().take_while(|ok| !**ok).count()
    }

    /// Number of recorded outcomes currently in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Failure threshold this breaker trips at.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_until_threshold_failures() {
        let mut breaker = CircuitBreaker::new(5, 3);
        assert!(!breaker.is_open());

        breaker.record(false);
        breaker.record(false);
        assert!(!breaker.is_open());

        breaker.record(false);
        assert!(breaker.is_open());
    }

    #[test]
    fn test_success_closes_immediately() {
        let mut breaker = CircuitBreaker::new(5, 3);
        for _ in 0..3 {
            breaker.record(false);
        }
        assert!(breaker.is_open());

        breaker.record(true);
        assert!(!breaker.is_open());
        assert_eq!(breaker.len(), 0);
    }

    #[test]
    fn test_opens_exactly_when_recent_threshold_all_fail() {
        // success inside the trailing window keeps it closed
        let mut breaker = CircuitBreaker::new(10, 3);
        breaker.record(false);
        breaker.record(false);
        breaker.record(true);
        breaker.record(false);
        breaker.record(false);
        assert!(!breaker.is_open());
        assert_eq!(breaker.consecutive_failures(), 2);

        breaker.record(false);
        assert!(breaker.is_open());
        assert_eq!(breaker.consecutive_failures(), 3);
    }

    #[test]
    fn test_window_bounds_memory() {
        let mut breaker = CircuitBreaker::new(4, 2);
        for _ in 0..100 {
            breaker.record(false);
        }
        assert_eq!(breaker.len(), 4);
        assert!(breaker.is_open());
    }

    #[test]
    fn test_threshold_one() {
        let mut breaker = CircuitBreaker::new(3, 1);
        assert!(!breaker.is_open());
        breaker.record(false);
        assert!(breaker.is_open());
        breaker.record(true);
        assert!(!breaker.is_open());
    }
}
