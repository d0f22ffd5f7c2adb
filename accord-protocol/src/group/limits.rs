/// Membership log guardrails.
///
/// These constants bound log growth and the work a single inbound message can
/// cause.

/// Max CBOR body size per event (images dominate).
pub const MAX_EVENT_PAYLOAD_BYTES: usize = 256 * 1024; // 256 KB

/// Max events carried by one inbound membership update message.
pub const MAX_EVENTS_PER_MESSAGE: usize = 1_000;

/// Log size at which outgoing updates switch to abridged events.
pub const MAX_EVENTS_PER_GROUP: usize = 5_000;

/// Hard cap: merges that would grow the log past this are rejected.
pub const HARD_CAP_EVENTS_PER_GROUP: usize = 20_000;

/// Max members named in a single `MembersAdded` / `AdminsAdded` event.
pub const MAX_MEMBERS_PER_EVENT: usize = 256;

/// Log limit status for a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLimitStatus {
    /// Under soft cap, all events accepted.
    Ok,
    /// Approaching limit: peers should be sent abridged events.
    NeedsCompaction,
    /// Hard cap reached: reject merges that add events.
    HardCapReached,
}

/// Check whether a log of `event_count` events is approaching or at its limit.
pub fn check_log_limits(event_count: usize) -> LogLimitStatus {
    if event_count >= HARD_CAP_EVENTS_PER_GROUP {
        LogLimitStatus::HardCapReached
    } else if event_count >= MAX_EVENTS_PER_GROUP {
        LogLimitStatus::NeedsCompaction
    } else {
        LogLimitStatus::Ok
    }
}
