//! # Accord Protocol
//!
//! **Convergent contact and group state for a decentralized messenger.**
//!
//! Peers and paired devices exchange updates with no central source of truth
//! and no delivery ordering. This crate decides, for every incoming update,
//! whether it is newer than what is known, how to merge it, and what must be
//! sent back so both sides end up agreeing:
//!
//! - **Contact request state machine** (per-track logical clocks, block/unblock)
//! - **Propagated-state reconciliation** (self-healing contact relationships)
//! - **Group membership event log** (signed events, deterministic replay)
//! - **Clock-gated updates** for chats, messages, edits and deletes
//!
//! Everything here is pure and I/O-free; the `accord` crate wires it to
//! stores and a dispatch sink.
//!
//! ## Quick Start
//!
//! ```rust
//! use accord_protocol::contact::Contact;
//! use accord_protocol::ids::IdentityKey;
//!
//! let peer = IdentityKey::from_bytes([7u8; 32]);
//! let (contact, response) = Contact::new(peer).contact_request_received(10);
//! assert!(response.new_request_received);
//! assert!(contact.has_added_us());
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`contact`] | Contact request state machine and propagated-state reconciliation |
//! | [`group`] | Signed membership event log (merge, replay, permissions, metadata) |
//! | [`gate`] | `apply_if_newer` and clock-gated registers |
//! | [`clock`] | Per-chat clock discipline and time sources |
//! | [`chat`] / [`message`] | Chat metadata and message edit/delete records |
//! | [`protocol`] | Versioned wire payloads |
//! | [`crypto`] | Ed25519 signing capabilities |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `std` | Yes | Standard library support |
//! | `groups` | Yes | Group membership log (adds `ciborium` for CBOR encoding) |

#![allow(
    clippy::empty_line_after_doc_comments,
    clippy::doc_lazy_continuation,
    clippy::new_without_default
)]

// ── Public modules ──────────────────────────────────────────────────────────

/// Chat records with clock-gated deletion, read markers and last clock.
pub mod chat;

/// Logical clocks and wall-clock sources.
pub mod clock;

/// Contact request state machine and propagated-state reconciliation.
pub mod contact;

/// Ed25519 signing and verification capabilities.
pub mod crypto;

/// Validation errors shared by wire payloads.
pub mod error;

/// The update gate: strictly-newer-clock application.
pub mod gate;

/// Group membership event log.
#[cfg(feature = "groups")]
pub mod group;

/// Identity keys and chat ids.
pub mod ids;

/// Stored messages with edits, deletes and pending changes.
pub mod message;

/// Versioned wire payloads and envelopes.
pub mod protocol;

// ── Re-exports for convenience ──────────────────────────────────────────────

pub use chat::{Chat, ChatMember, ChatType};
pub use clock::{next_clock_and_timestamp, ClockSource, SystemTimeSource, TimeSource};
pub use contact::{Contact, ContactRequestState, ProcessingResponse};
pub use crypto::{Ed25519Signer, Ed25519Verifier, EventSigner, SignatureVerifier};
pub use error::ValidationError;
pub use gate::{apply_if_newer, ClockGated};
pub use ids::{ChatID, IdentityKey};
pub use message::{Message, MessageError, PendingChanges};
pub use protocol::{MessageType, WireEnvelope, WireError, WirePayload};

#[cfg(feature = "groups")]
pub use group::{Group, GroupError, MembershipUpdateEvent};

// ── Library metadata ────────────────────────────────────────────────────────

/// Accord Protocol version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the protocol crate version string.
pub fn version() -> &'static str {
    VERSION
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert!(version().contains('.'));
    }

    #[test]
    fn test_signer_identity_matches_verifier() {
        let signer = Ed25519Signer::generate();
        let sig = signer.sign(b"accord").unwrap();
        assert!(Ed25519Verifier
            .verify(b"accord", &sig, &signer.identity())
            .unwrap());
    }
}
