#![no_main]
use libfuzzer_sys::fuzz_target;

use accord_protocol::protocol::{MembershipUpdateMessage, WirePayload};
use accord_protocol::{Ed25519Verifier, Group};

fuzz_target!(|data: &[u8]| {
    let Ok(update) = MembershipUpdateMessage::decode(data) else {
        return;
    };
    if update.validate().is_err() {
        return;
    }
    let me = update.events[0].from;
    let verifier = Ed25519Verifier;

    // Unsigned or forged events must be rejected without panicking.
    let Ok(group) = Group::from_events(update.chat_id.clone(), &update.events, &me, &verifier)
    else {
        return;
    };

    // Whatever was accepted merges again as a no-op.
    let (again, fresh) = group
        .merge(&update.events, &verifier)
        .expect("re-merging accepted events succeeds");
    assert!(fresh.is_empty());
    assert_eq!(again.state_hash(), group.state_hash());
});
