//! Last-writer-wins gating by counter
//!
//! Messages between the background and pages can arrive in any order once
//! several round trips are in flight. Each category of update carries a
//! monotonically increasing counter and the receiver keeps one gate per
//! category: an update is accepted only if its counter is not lower than
//! the last one accepted.

/// Tracks the highest accepted counter for one category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterGate {
    last: Option<u64>,
}

impl CounterGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Would `counter` be accepted, without recording it
    pub fn admits(&self, counter: u64) -> bool {
        self.last.map_or(true, |last| counter >= last)
    }

    /// Accept and record `counter` if it is not stale
    pub fn accept(&mut self, counter: u64) -> bool {
        if !self.admits(counter) {
            return false;
        }
        self.last = Some(counter);
        true
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Monotonic counter source for the sending side
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSource {
    next: u64,
}

impl CounterSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next counter value (starting at 1)
    pub fn mint(&mut self) -> u64 {
        self.next += 1;
        self.next
    }

    /// Most recently minted value, 0 if none yet
    pub fn current(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_update_always_accepted() {
        let mut gate = CounterGate::new();
        assert!(gate.accept(5));
        assert_eq!(gate.last(), Some(5));
    }

    #[test]
    fn test_equal_counter_accepted() {
        let mut gate = CounterGate::new();
        assert!(gate.accept(3));
        assert!(gate.accept(3));
    }

    #[test]
    fn test_lower_counter_rejected() {
        let mut gate = CounterGate::new();
        assert!(gate.accept(2));
        assert!(!gate.accept(1));
        assert_eq!(gate.last(), Some(2));
    }

    #[test]
    fn test_reset_reopens_gate() {
        let mut gate = CounterGate::new();
        gate.accept(9);
        gate.reset();
        assert!(gate.accept(1));
    }

    #[test]
    fn test_source_is_monotonic() {
        let mut source = CounterSource::new();
        assert_eq!(source.current(), 0);
        assert_eq!(source.mint(), 1);
        assert_eq!(source.mint(), 2);
        assert_eq!(source.current(), 2);
    }

    proptest! {
        #[test]
        fn accepted_counters_never_decrease(counters in proptest::collection::vec(0u64..50, 0..40)) {
            let mut gate = CounterGate::new();
            let mut accepted = Vec::new();
            for c in counters {
                if gate.accept(c) {
                    accepted.push(c);
                }
            }
            prop_assert!(accepted.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
