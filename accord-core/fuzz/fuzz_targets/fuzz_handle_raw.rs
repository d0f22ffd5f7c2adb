#![no_main]
use std::sync::Arc;

use libfuzzer_sys::fuzz_target;

use accord::{Messenger, MessengerConfig, RecordingDispatch};
use accord_protocol::clock::ManualTimeSource;
use accord_protocol::{Ed25519Signer, Ed25519Verifier, IdentityKey};

fuzz_target!(|data: &[u8]| {
    if data.len() < 33 {
        return;
    }
    let mut sender = [0u8; 32];
    sender.copy_from_slice(&data[..32]);

    let messenger = Messenger::new(
        Arc::new(Ed25519Signer::generate()),
        Arc::new(Ed25519Verifier),
        Arc::new(RecordingDispatch::new()),
        Arc::new(ManualTimeSource::new(1_000)),
        MessengerConfig::default(),
    );

    // The whole inbound path must reject garbage without panicking.
    let _ = messenger.handle_raw(&IdentityKey::from_bytes(sender), &data[32..]);
});
