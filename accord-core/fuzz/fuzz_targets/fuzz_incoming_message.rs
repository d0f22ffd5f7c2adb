#![no_main]
use libfuzzer_sys::fuzz_target;

use accord::IncomingMessage;
use accord_protocol::WireEnvelope;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must decode or fail, never panic.
    let Ok(message) = IncomingMessage::decode(data) else {
        return;
    };

    // Anything that decoded carries a type that matches its envelope.
    let envelope = WireEnvelope::deserialize(data).expect("decoded input is an envelope");
    assert_eq!(message.message_type(), envelope.message_type);
});
