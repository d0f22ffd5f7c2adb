/// Group chats: a signed membership event log.
///
/// Every change to a group (creation, adds, removals, joins, admin changes,
/// name/color/image) is a signed, immutable event. Peers converge by
/// exchanging events and replaying the union in deterministic order.
///
/// # Module structure
/// - `event`: MembershipUpdateEvent, EventType, EventBody, signing/verification
/// - `limits`: Guardrail constants and log limit checking
/// - `membership`: Per-member add/remove clocks with admin authorization
/// - `metadata`: LWW registers for group name, color, image
/// - `log`: The group engine (merge, replay, abridged events, state_hash)
pub mod event;
pub mod limits;
pub mod log;
pub mod membership;
pub mod metadata;

pub use event::{
    cbor_decode, cbor_encode, EventBody, EventError, EventId, EventType, MembershipUpdateEvent,
};
pub use limits::{check_log_limits, LogLimitStatus};
pub use log::{Group, GroupError};
pub use membership::{MemberEntry, MembershipError, MembershipState};
pub use metadata::{LWWRegister, MetadataError, MetadataState};
