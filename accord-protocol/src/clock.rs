/// Clock discipline.
///
/// Logical clocks are per chat. A new clock is the wall-clock time in
/// milliseconds when that is ahead of the chat's last clock, otherwise the
/// last clock plus one, so clocks never repeat or go backwards within a chat
/// even when the wall clock does.
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ids::ChatID;

/// Source of wall-clock milliseconds.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
    }
}

/// Manually driven time, for hosts that replay recorded traffic and for tests.
#[derive(Debug, Default)]
pub struct ManualTimeSource(AtomicU64);

impl ManualTimeSource {
    pub fn new(start_ms: u64) -> Self {
        ManualTimeSource(AtomicU64::new(start_ms))
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Supplies the next `(clock, timestamp)` for a chat. Implementations must
/// hand out strictly increasing clocks per chat, including under concurrent
/// callers.
pub trait ClockSource: Send + Sync {
    fn next(&self, chat_id: &ChatID) -> (u64, u64);
}

/// Next clock for a chat whose last clock is `last_clock`.
///
/// Returns `(clock, timestamp)`; the caller stores `clock` back as the chat's
/// last clock value.
pub fn next_clock_and_timestamp(last_clock: u64, time: &dyn TimeSource) -> (u64, u64) {
    let timestamp = time.now_ms();
    let clock = if last_clock == 0 || last_clock < timestamp {
        timestamp
    } else {
        last_clock + 1
    };
    (clock, timestamp)
}
