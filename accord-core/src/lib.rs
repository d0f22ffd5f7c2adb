// Crate-level lint configuration: suppress stylistic warnings that don't affect correctness.
#![allow(
    clippy::empty_line_after_doc_comments,
    clippy::doc_lazy_continuation,
    clippy::too_many_arguments,
    clippy::type_complexity,
    clippy::new_without_default
)]

//! # Accord
//!
//! Messenger wiring around the `accord-protocol` state machines: keyed
//! stores, the inbound router, contact/group/chat handlers and the outbound
//! dispatch sink.
//!
//! ```
//! use std::sync::Arc;
//! use accord::{Messenger, MessengerConfig, RecordingDispatch};
//! use accord_protocol::{Ed25519Signer, Ed25519Verifier, SystemTimeSource};
//!
//! let outbox = Arc::new(RecordingDispatch::new());
//! let messenger = Messenger::new(
//!     Arc::new(Ed25519Signer::generate()),
//!     Arc::new(Ed25519Verifier),
//!     outbox.clone(),
//!     Arc::new(SystemTimeSource),
//!     MessengerConfig::default(),
//! );
//! assert!(messenger.contacts().is_empty());
//! ```

// ── Re-export the protocol crate ────────────────────────────────────────────
pub use accord_protocol as protocol;

// ── Local modules ───────────────────────────────────────────────────────────
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod messenger;
pub mod response;
pub mod router;
pub mod store;

// ── Re-export main types ────────────────────────────────────────────────────
pub use config::MessengerConfig;
pub use dedup::{ReplayCache, ReplayClaim};
pub use dispatch::{Dispatch, MessageId, RawMessage, Recipient, RecordingDispatch};
pub use error::{MessengerError, Result};
pub use identity::Identity;
pub use messenger::{Messenger, Stores};
pub use response::{MessengerResponse, Notification};
pub use router::IncomingMessage;
pub use store::{update_with, MemoryStore, Store};

// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version
pub fn get_version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let version = get_version();
        assert!(!version.is_empty());
        assert_eq!(protocol::version(), protocol::VERSION);
    }
}
