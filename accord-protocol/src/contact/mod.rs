/// Contact request state machine.
///
/// Every contact carries two independently clocked tracks:
/// - the local track (`None` / `Sent` / `Dismissed`), what we did
/// - the remote track (`None` / `Received`), what the peer did
///
/// Transitions are pure: they take `&Contact` and return the next contact
/// plus a [`ProcessingResponse`]. Each track only moves forward on a strictly
/// greater clock, so redelivered and reordered updates are dropped.
///
/// # Module structure
/// - `state`: persisted `ContactRequestState` values
/// - `reconcile`: propagated-state convergence check and repair
pub mod reconcile;
pub mod state;

use serde::{Deserialize, Serialize};

use crate::gate::apply_if_newer;
use crate::ids::IdentityKey;
use crate::protocol::contact::ContactRequestPropagatedState;

pub use state::ContactRequestState;

// ---------------------------------------------------------------------------
// ProcessingResponse
// ---------------------------------------------------------------------------

/// Outcome of a contact transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResponse {
    /// The contact changed (or a send-back was requested).
    pub processed: bool,
    /// The peer's request moved from `None` to `Received`; raise a notification.
    pub new_request_received: bool,
    /// Our view is newer than the peer's; re-announce our state.
    pub send_back_state: bool,
}

impl ProcessingResponse {
    fn applied() -> Self {
        ProcessingResponse {
            processed: true,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: IdentityKey,
    pub alias: String,
    pub local_nickname: String,
    pub ens_name: String,
    pub ens_verified: bool,
    pub display_name: String,
    pub blocked: bool,
    pub removed: bool,
    /// Clock of the last accepted profile update from the peer.
    pub last_updated: u64,
    /// Clock of the last local profile edit (nickname).
    pub last_updated_locally: u64,
    pub contact_request_local_state: ContactRequestState,
    pub contact_request_local_clock: u64,
    pub contact_request_remote_state: ContactRequestState,
    pub contact_request_remote_clock: u64,
}

impl Contact {
    /// A never-seen contact: both tracks `None` at clock 0.
    pub fn new(id: IdentityKey) -> Self {
        Contact {
            id,
            alias: id.alias(),
            local_nickname: String::new(),
            ens_name: String::new(),
            ens_verified: false,
            display_name: String::new(),
            blocked: false,
            removed: false,
            last_updated: 0,
            last_updated_locally: 0,
            contact_request_local_state: ContactRequestState::None,
            contact_request_local_clock: 0,
            contact_request_remote_state: ContactRequestState::None,
            contact_request_remote_clock: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Derived flags
    // -----------------------------------------------------------------------

    pub fn added(&self) -> bool {
        self.contact_request_local_state == ContactRequestState::Sent
    }

    pub fn has_added_us(&self) -> bool {
        self.contact_request_remote_state == ContactRequestState::Received
    }

    pub fn mutual(&self) -> bool {
        self.added() && self.has_added_us()
    }

    pub fn active(&self) -> bool {
        self.mutual() && !self.blocked
    }

    pub fn dismissed(&self) -> bool {
        self.contact_request_local_state == ContactRequestState::Dismissed
    }

    /// Single summary state for UI layers.
    pub fn contact_request_state(&self) -> ContactRequestState {
        if self.mutual() {
            ContactRequestState::Mutual
        } else if self.dismissed() {
            ContactRequestState::Dismissed
        } else if self.added() {
            ContactRequestState::Sent
        } else if self.has_added_us() {
            ContactRequestState::Received
        } else {
            ContactRequestState::None
        }
    }

    // -----------------------------------------------------------------------
    // Names
    // -----------------------------------------------------------------------

    fn names(&self) -> Vec<&str> {
        let mut names = Vec::with_capacity(4);
        if !self.local_nickname.is_empty() {
            names.push(self.local_nickname.as_str());
        }
        if self.ens_verified && !self.ens_name.is_empty() {
            names.push(self.ens_name.as_str());
        }
        if !self.display_name.is_empty() {
            names.push(self.display_name.as_str());
        }
        names.push(self.alias.as_str());
        names
    }

    /// nickname > verified ENS name > display name > alias
    pub fn primary_name(&self) -> String {
        self.names()
            .first()
            .map(|n| n.to_string())
            .unwrap_or_default()
    }

    /// Only populated when a nickname is set and another name is available.
    pub fn secondary_name(&self) -> Option<String> {
        if self.local_nickname.is_empty() {
            return None;
        }
        self.names().get(1).map(|n| n.to_string())
    }

    // -----------------------------------------------------------------------
    // Local actions
    // -----------------------------------------------------------------------

    /// Send a request, or accept an inbound one.
    pub fn contact_request_sent(&self, clock: u64) -> (Contact, ProcessingResponse) {
        self.transition(|c| c.sent(clock))
    }

    /// Accepting is sending: a device that never saw the inbound request
    /// still ends up in a consistent state.
    pub fn accept_contact_request(&self, clock: u64) -> (Contact, ProcessingResponse) {
        self.contact_request_sent(clock)
    }

    /// Symmetric reset of both tracks.
    pub fn retract_contact_request(&self, clock: u64) -> (Contact, ProcessingResponse) {
        self.transition(|c| c.retract(clock))
    }

    pub fn dismiss_contact_request(&self, clock: u64) -> (Contact, ProcessingResponse) {
        self.transition(|c| c.dismiss(clock))
    }

    /// Block: dismiss the request and mark removed. `blocked` is set even
    /// when the clock is stale.
    pub fn block(&self, clock: u64) -> (Contact, ProcessingResponse) {
        self.transition(|c| {
            c.blocked = true;
            let r = c.dismiss(clock);
            c.removed = true;
            r
        })
    }

    /// Unblock and reset the relationship; it must be re-established.
    pub fn unblock(&self, clock: u64) -> (Contact, ProcessingResponse) {
        self.transition(|c| {
            c.blocked = false;
            c.retract(clock)
        })
    }

    // -----------------------------------------------------------------------
    // Remote actions
    // -----------------------------------------------------------------------

    pub fn contact_request_received(&self, clock: u64) -> (Contact, ProcessingResponse) {
        self.transition(|c| c.received(clock, ProcessingResponse::default()))
    }

    /// Accepted is handled like received.
    pub fn contact_request_accepted(&self, clock: u64) -> (Contact, ProcessingResponse) {
        self.contact_request_received(clock)
    }

    /// The peer retracted. A locally dismissed request keeps its local track,
    /// and sync echoes from our own devices never touch the local track.
    pub fn contact_request_retracted(
        &self,
        clock: u64,
        from_syncing: bool,
    ) -> (Contact, ProcessingResponse) {
        self.transition(|c| c.retracted(clock, from_syncing, ProcessingResponse::default()))
    }

    // -----------------------------------------------------------------------
    // Paired-device sync
    // -----------------------------------------------------------------------

    /// Apply a snapshot from one of our own devices: local track first, then
    /// the remote track (treated as a sync echo).
    pub fn process_sync_contact_request_state(
        &self,
        remote_state: ContactRequestState,
        remote_clock: u64,
        local_state: ContactRequestState,
        local_clock: u64,
    ) -> (Contact, ProcessingResponse) {
        self.transition(|c| {
            let mut r = match local_state {
                ContactRequestState::Dismissed => c.dismiss(local_clock),
                ContactRequestState::None => c.retract(local_clock),
                ContactRequestState::Sent => c.sent(local_clock),
                _ => ProcessingResponse::default(),
            };

            r = match remote_state {
                ContactRequestState::Received => c.received(remote_clock, r),
                ContactRequestState::None => c.retracted(remote_clock, true, r),
                _ => r,
            };
            r
        })
    }

    /// Snapshot of our view, embedded in outgoing contact updates.
    pub fn propagated_state(&self) -> ContactRequestPropagatedState {
        ContactRequestPropagatedState {
            local_clock: self.contact_request_local_clock,
            local_state: self.contact_request_local_state.as_u64(),
            remote_clock: self.contact_request_remote_clock,
            remote_state: self.contact_request_remote_state.as_u64(),
        }
    }

    // -----------------------------------------------------------------------
    // Profile
    // -----------------------------------------------------------------------

    /// Apply profile fields from a peer's contact update. Returns whether the
    /// update was newer than the last one applied. An empty display name keeps
    /// the current one.
    pub fn apply_profile_update(
        &self,
        clock: u64,
        display_name: &str,
        ens_name: &str,
    ) -> (Contact, bool) {
        let mut next = self.clone();
        let applied = apply_if_newer(self.last_updated, clock, || {
            next.last_updated = clock;
            if !display_name.is_empty() {
                next.display_name = display_name.to_string();
            }
            if next.ens_name != ens_name {
                next.ens_verified = false;
            }
            next.ens_name = ens_name.to_string();
        });
        (next, applied)
    }

    pub fn set_nickname(&self, clock: u64, nickname: &str) -> (Contact, bool) {
        let mut next = self.clone();
        let applied = apply_if_newer(self.last_updated_locally, clock, || {
            next.last_updated_locally = clock;
            next.local_nickname = nickname.to_string();
        });
        (next, applied)
    }

    // -----------------------------------------------------------------------
    // In-place steps (only reachable through `transition`)
    // -----------------------------------------------------------------------

    fn transition(
        &self,
        step: impl FnOnce(&mut Contact) -> ProcessingResponse,
    ) -> (Contact, ProcessingResponse) {
        let mut next = self.clone();
        let response = step(&mut next);
        (next, response)
    }

    fn sent(&mut self, clock: u64) -> ProcessingResponse {
        if clock <= self.contact_request_local_clock {
            return ProcessingResponse::default();
        }
        self.contact_request_local_clock = clock;
        self.contact_request_local_state = ContactRequestState::Sent;
        self.removed = false;
        ProcessingResponse::applied()
    }

    fn retract(&mut self, clock: u64) -> ProcessingResponse {
        if clock <= self.contact_request_local_clock {
            return ProcessingResponse::default();
        }
        self.contact_request_local_clock = clock;
        self.contact_request_local_state = ContactRequestState::None;
        self.contact_request_remote_clock = clock;
        self.contact_request_remote_state = ContactRequestState::None;
        self.removed = true;
        ProcessingResponse::applied()
    }

    fn dismiss(&mut self, clock: u64) -> ProcessingResponse {
        if clock <= self.contact_request_local_clock {
            return ProcessingResponse::default();
        }
        self.contact_request_local_clock = clock;
        self.contact_request_local_state = ContactRequestState::Dismissed;
        ProcessingResponse::applied()
    }

    pub(crate) fn received(&mut self, clock: u64, mut r: ProcessingResponse) -> ProcessingResponse {
        if clock <= self.contact_request_remote_clock {
            return r;
        }
        r.processed = true;
        self.contact_request_remote_clock = clock;
        if self.contact_request_remote_state == ContactRequestState::None {
            r.new_request_received = true;
        }
        self.contact_request_remote_state = ContactRequestState::Received;
        r
    }

    pub(crate) fn retracted(
        &mut self,
        clock: u64,
        from_syncing: bool,
        mut r: ProcessingResponse,
    ) -> ProcessingResponse {
        if clock <= self.contact_request_remote_clock {
            return r;
        }
        if self.contact_request_local_state != ContactRequestState::Dismissed && !from_syncing {
            self.contact_request_local_clock = clock;
            self.contact_request_local_state = ContactRequestState::None;
        }
        self.contact_request_remote_clock = clock;
        self.contact_request_remote_state = ContactRequestState::None;
        r.processed = true;
        r
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        Contact::new(IdentityKey([0x11; 32]))
    }

    /// Helper: a contact that both sent and received at the given clocks.
    fn mutual_at(local: u64, remote: u64) -> Contact {
        contact()
            .contact_request_sent(local)
            .0
            .contact_request_received(remote)
            .0
    }

    #[test]
    fn test_new_contact_is_empty() {
        let c = contact();
        assert!(!c.added());
        assert!(!c.has_added_us());
        assert!(!c.mutual());
        assert_eq!(c.contact_request_state(), ContactRequestState::None);
    }

    #[test]
    fn test_sent_sets_local_track_and_clears_removed() {
        let mut c = contact();
        c.removed = true;
        let (next, r) = c.contact_request_sent(5);
        assert!(r.processed);
        assert!(next.added());
        assert!(!next.removed);
        assert_eq!(next.contact_request_local_clock, 5);
        // input untouched
        assert!(!c.added());
    }

    #[test]
    fn test_stale_clock_is_dropped() {
        let (c, _) = contact().contact_request_sent(10);
        let (next, r) = c.dismiss_contact_request(10);
        assert!(!r.processed);
        assert_eq!(next, c);
        let (next, r) = c.dismiss_contact_request(3);
        assert!(!r.processed);
        assert_eq!(next, c);
    }

    #[test]
    fn test_monotonicity_high_then_low_equals_high() {
        let only_high = contact().contact_request_received(9).0;
        let both = contact()
            .contact_request_received(9)
            .0
            .contact_request_retracted(4, false)
            .0;
        assert_eq!(both, only_high);
    }

    #[test]
    fn test_idempotent_application() {
        let once = contact().dismiss_contact_request(7).0;
        let (twice, r) = once.dismiss_contact_request(7);
        assert!(!r.processed);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_retract_is_symmetric() {
        let c = mutual_at(2, 3);
        assert!(c.mutual());

        let (next, r) = c.retract_contact_request(4);
        assert!(r.processed);
        assert_eq!(next.contact_request_local_state, ContactRequestState::None);
        assert_eq!(next.contact_request_remote_state, ContactRequestState::None);
        assert_eq!(next.contact_request_local_clock, 4);
        assert_eq!(next.contact_request_remote_clock, 4);
        assert!(next.removed);
    }

    #[test]
    fn test_received_flags_new_request_only_from_none() {
        let (c, r) = contact().contact_request_received(1);
        assert!(r.processed);
        assert!(r.new_request_received);

        let (_, r) = c.contact_request_received(2);
        assert!(r.processed);
        assert!(!r.new_request_received);
    }

    #[test]
    fn test_accepted_is_received() {
        let (a, ra) = contact().contact_request_accepted(3);
        let (b, rb) = contact().contact_request_received(3);
        assert_eq!(a, b);
        assert_eq!(ra, rb);
    }

    #[test]
    fn test_dismiss_is_sticky_against_remote_retraction() {
        let c = contact().dismiss_contact_request(10).0;

        let (next, r) = c.contact_request_retracted(15, false);
        assert!(r.processed);
        assert_eq!(next.contact_request_local_state, ContactRequestState::Dismissed);
        assert_eq!(next.contact_request_local_clock, 10);
        assert_eq!(next.contact_request_remote_clock, 15);
    }

    #[test]
    fn test_retracted_from_syncing_leaves_local_track() {
        let c = contact().contact_request_sent(3).0;
        let (next, r) = c.contact_request_retracted(8, true);
        assert!(r.processed);
        assert!(next.added());
        assert_eq!(next.contact_request_local_clock, 3);
        assert_eq!(next.contact_request_remote_clock, 8);
    }

    #[test]
    fn test_block_and_unblock() {
        let c = mutual_at(1, 1);
        let (blocked, r) = c.block(2);
        assert!(r.processed);
        assert!(blocked.blocked);
        assert!(blocked.removed);
        assert!(blocked.dismissed());
        assert!(!blocked.active());

        let (unblocked, r) = blocked.unblock(3);
        assert!(r.processed);
        assert!(!unblocked.blocked);
        assert!(!unblocked.has_added_us());
        assert!(!unblocked.added());
        assert!(unblocked.removed);
    }

    #[test]
    fn test_block_with_stale_clock_still_blocks() {
        let c = contact().contact_request_sent(9).0;
        let (blocked, r) = c.block(4);
        assert!(!r.processed);
        assert!(blocked.blocked);
        assert!(blocked.removed);
        assert!(blocked.added());
    }

    #[test]
    fn test_scenario_request_then_accept_is_mutual() {
        let (c, r) = contact().contact_request_received(1);
        assert!(r.new_request_received);
        let (c, r) = c.accept_contact_request(2);
        assert!(r.processed);
        assert!(c.added());
        assert!(c.has_added_us());
        assert!(c.mutual());
        assert_eq!(c.contact_request_state(), ContactRequestState::Mutual);
    }

    #[test]
    fn test_scenario_peer_retracts_mutual() {
        let c = mutual_at(2, 1);
        let (c, r) = c.contact_request_retracted(3, false);
        assert!(r.processed);
        assert_eq!(c.contact_request_remote_state, ContactRequestState::None);
        assert_eq!(c.contact_request_local_state, ContactRequestState::None);
        assert_eq!(c.contact_request_local_clock, 3);
        assert!(!c.active());
    }

    #[test]
    fn test_summary_state_precedence() {
        let dismissed_and_received = contact()
            .contact_request_received(1)
            .0
            .dismiss_contact_request(2)
            .0;
        assert_eq!(
            dismissed_and_received.contact_request_state(),
            ContactRequestState::Dismissed
        );
        let received = contact().contact_request_received(1).0;
        assert_eq!(received.contact_request_state(), ContactRequestState::Received);
        let sent = contact().contact_request_sent(1).0;
        assert_eq!(sent.contact_request_state(), ContactRequestState::Sent);
    }

    #[test]
    fn test_sync_state_applies_local_then_remote() {
        let (c, r) = contact().process_sync_contact_request_state(
            ContactRequestState::Received,
            4,
            ContactRequestState::Sent,
            5,
        );
        assert!(r.processed);
        assert!(c.mutual());

        // A sync reporting no remote request is an echo: local track stays.
        let (c2, _) = c.process_sync_contact_request_state(
            ContactRequestState::None,
            6,
            ContactRequestState::Sent,
            5,
        );
        assert!(c2.added());
        assert!(!c2.has_added_us());
    }

    #[test]
    fn test_sync_state_dismissed() {
        let (c, _) = contact().process_sync_contact_request_state(
            ContactRequestState::None,
            0,
            ContactRequestState::Dismissed,
            2,
        );
        assert!(c.dismissed());
    }

    #[test]
    fn test_primary_and_secondary_names() {
        let mut c = contact();
        assert_eq!(c.primary_name(), c.alias);
        assert_eq!(c.secondary_name(), None);

        c.display_name = "Alice".into();
        assert_eq!(c.primary_name(), "Alice");
        assert_eq!(c.secondary_name(), None);

        c.ens_name = "alice.eth".into();
        assert_eq!(c.primary_name(), "Alice");
        c.ens_verified = true;
        assert_eq!(c.primary_name(), "alice.eth");

        c.local_nickname = "Al".into();
        assert_eq!(c.primary_name(), "Al");
        assert_eq!(c.secondary_name().as_deref(), Some("alice.eth"));
    }

    #[test]
    fn test_profile_update_is_clock_gated() {
        let (c, applied) = contact().apply_profile_update(5, "Bob", "");
        assert!(applied);
        assert_eq!(c.display_name, "Bob");

        let (c2, applied) = c.apply_profile_update(5, "Mallory", "");
        assert!(!applied);
        assert_eq!(c2.display_name, "Bob");
    }

    #[test]
    fn test_changed_ens_name_drops_verification() {
        let mut c = contact();
        c.ens_name = "bob.eth".into();
        c.ens_verified = true;
        let (c, _) = c.apply_profile_update(1, "Bob", "bob.eth");
        assert!(c.ens_verified);
        let (c, _) = c.apply_profile_update(2, "Bob", "rob.eth");
        assert!(!c.ens_verified);
    }

    #[test]
    fn test_nickname_is_clock_gated() {
        let (c, applied) = contact().set_nickname(3, "Nick");
        assert!(applied);
        let (c, applied) = c.set_nickname(2, "Old");
        assert!(!applied);
        assert_eq!(c.local_nickname, "Nick");
    }

    #[test]
    fn test_propagated_state_snapshot() {
        let c = mutual_at(4, 6);
        let s = c.propagated_state();
        assert_eq!(s.local_clock, 4);
        assert_eq!(s.local_state, ContactRequestState::Sent.as_u64());
        assert_eq!(s.remote_clock, 6);
        assert_eq!(s.remote_state, ContactRequestState::Received.as_u64());
    }
}
