/// Clock-gated apply.
///
/// Every piece of shared mutable state outside the contact tracks (chat
/// clocks, message edits, deletes, profile fields) is written only through
/// this guard, so the writes commute and redelivery is a no-op.
use serde::{Deserialize, Serialize};

/// Run `mutation` iff `incoming_clock` is strictly newer than `stored_clock`.
pub fn apply_if_newer(stored_clock: u64, incoming_clock: u64, mutation: impl FnOnce()) -> bool {
    if incoming_clock <= stored_clock {
        log::debug!(
            "Dropping stale update (stored clock {}, incoming {})",
            stored_clock,
            incoming_clock
        );
        return false;
    }
    mutation();
    true
}

/// A value paired with the clock of its last write.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClockGated<T> {
    value: T,
    clock: u64,
}

impl<T> ClockGated<T> {
    pub fn new(value: T, clock: u64) -> Self {
        ClockGated { value, clock }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Replace the value if `clock` is newer. Returns whether it was applied.
    pub fn set(&mut self, value: T, clock: u64) -> bool {
        if clock <= self.clock {
            return false;
        }
        self.value = value;
        self.clock = clock;
        true
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_if_newer() {
        let mut stored = 5u64;
        let mut value = "old";

        assert!(!apply_if_newer(stored, 5, || value = "same"));
        assert!(!apply_if_newer(stored, 3, || value = "older"));
        assert_eq!(value, "old");

        assert!(apply_if_newer(stored, 6, || {
            value = "new";
            stored = 6;
        }));
        assert_eq!(value, "new");
        assert_eq!(stored, 6);
    }

    #[test]
    fn test_clock_gated_equal_clock_keeps_first_write() {
        let writes = [(3, "c"), (1, "a"), (2, "b"), (3, "x")];

        let mut forward = ClockGated::default();
        for (clock, v) in writes {
            forward.set(v, clock);
        }

        let mut backward = ClockGated::default();
        for (clock, v) in writes.iter().rev() {
            backward.set(*v, *clock);
        }

        // Same final clock either way; at equal clocks the first write stays.
        assert_eq!(forward.clock(), 3);
        assert_eq!(backward.clock(), 3);
        assert_eq!(*forward.get(), "c");
        assert_eq!(*backward.get(), "x");
    }

    #[test]
    fn test_clock_gated_rejects_zero_over_default() {
        let mut g: ClockGated<u32> = ClockGated::default();
        assert!(!g.set(9, 0));
        assert!(g.set(9, 1));
        assert_eq!(g.into_inner(), 9);
    }
}
