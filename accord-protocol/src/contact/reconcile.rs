/// Propagated-state reconciliation.
///
/// Peers embed a [`ContactRequestPropagatedState`] snapshot of their own view
/// in outgoing contact updates. The peer's local track is our remote track and
/// vice versa. On receipt we either ask the caller to re-announce our state
/// (peer is behind), adopt a retraction the peer saw before us, or advance our
/// remote track from the peer's own local track.
///
/// Only a `None` claim about our own track is ever adopted. Any other claim
/// needs a corroborating `Sent`/`Received` transition.
use crate::contact::{Contact, ContactRequestState, ProcessingResponse};
use crate::protocol::contact::ContactRequestPropagatedState;

impl Contact {
    pub fn contact_request_propagated_state_received(
        &self,
        state: &ContactRequestPropagatedState,
    ) -> (Contact, ProcessingResponse) {
        let mut next = self.clone();
        let mut response = ProcessingResponse::default();

        // What the peer believes our local track is.
        let expected_local_clock = state.remote_clock;
        let expected_local_state = state.remote_state;

        // The peer's own local track, seen from our side.
        let remote_clock = state.local_clock;
        let remote_state = ContactRequestState::from_u64(state.local_state).ok();

        // Peer is behind on our track: re-announce, change nothing.
        if expected_local_clock < self.contact_request_local_clock
            && expected_local_state != self.contact_request_local_state.as_u64()
        {
            response.processed = true;
            response.send_back_state = true;
        }

        // Peer is ahead on our track. Adopt only a retraction, and never
        // reopen a dismissed request.
        if expected_local_clock > self.contact_request_local_clock
            && self.contact_request_local_state != ContactRequestState::Dismissed
            && expected_local_state == ContactRequestState::None.as_u64()
        {
            response.processed = true;
            next.contact_request_local_clock = expected_local_clock;
            next.contact_request_local_state = ContactRequestState::None;
            // Possibly an implicit retraction we never received.
            next.contact_request_remote_state = ContactRequestState::None;
        }

        if remote_clock > next.contact_request_remote_clock {
            match remote_state {
                Some(ContactRequestState::Sent) => {
                    response = next.received(remote_clock, response);
                }
                Some(ContactRequestState::None) => {
                    response = next.retracted(remote_clock, false, response);
                }
                _ => {}
            }
        }

        if response.processed {
            log::debug!(
                "Reconciled contact {} (send_back={}, local={:?}@{}, remote={:?}@{})",
                self.id.short(),
                response.send_back_state,
                next.contact_request_local_state,
                next.contact_request_local_clock,
                next.contact_request_remote_state,
                next.contact_request_remote_clock,
            );
        }

        (next, response)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
