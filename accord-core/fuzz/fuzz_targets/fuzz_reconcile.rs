#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use accord_protocol::protocol::contact::ContactRequestPropagatedState;
use accord_protocol::{Contact, ContactRequestState, IdentityKey};

#[derive(Arbitrary, Debug)]
struct Input {
    sent_clock: u64,
    received_clock: u64,
    local_clock: u64,
    local_state: u64,
    remote_clock: u64,
    remote_state: u64,
}

fuzz_target!(|input: Input| {
    let (contact, _) = Contact::new(IdentityKey::from_bytes([7u8; 32]))
        .contact_request_sent(input.sent_clock);
    let (contact, _) = contact.contact_request_received(input.received_clock);

    let state = ContactRequestPropagatedState {
        local_clock: input.local_clock,
        local_state: input.local_state,
        remote_clock: input.remote_clock,
        remote_state: input.remote_state,
    };
    let (next, response) = contact.contact_request_propagated_state_received(&state);

    // The remote clock never moves backwards.
    assert!(next.contact_request_remote_clock >= contact.contact_request_remote_clock);

    // A peer can only ever push our local track to None.
    if next.contact_request_local_state != contact.contact_request_local_state {
        assert_eq!(next.contact_request_local_state, ContactRequestState::None);
    }

    // A send-back never invents a request.
    if response.send_back_state {
        assert!(response.processed);
    }
});
