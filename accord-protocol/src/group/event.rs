/// Signed membership update events.
///
/// Every group change is an immutable, signed event. Events are the atomic
/// unit of the membership log: stored, replicated, merged by identity and
/// replayed deterministically.
///
/// - Body: CBOR-encoded via ciborium into `raw_payload`
/// - Signing: Ed25519 over BLAKE3(chat_id || raw_payload)
/// - Identity: BLAKE3(chat_id || from || signature || raw_payload)
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use std::fmt;
use thiserror::Error;

use crate::crypto::signing::{EventSigner, SignatureVerifier};
use crate::group::limits::MAX_EVENT_PAYLOAD_BYTES;
use crate::ids::{ChatID, IdentityKey};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Payload exceeds max size ({size} > {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("CBOR encoding failed: {0}")]
    CborEncode(String),

    #[error("CBOR decoding failed: {0}")]
    CborDecode(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Event fields do not match the signed payload")]
    PayloadMismatch,
}

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum EventType {
    Created = 1,
    NameChanged = 2,
    MembersAdded = 3,
    MemberJoined = 4,
    MembersRemoved = 5,
    AdminsAdded = 6,
    AdminsRemoved = 7,
    ColorChanged = 8,
    ImageChanged = 9,
}

impl EventType {
    /// Replay order among events sharing a clock value. Removals come last so
    /// that a removal wins over a concurrent add at the same clock.
    pub fn replay_rank(&self) -> u8 {
        match self {
            EventType::Created => 0,
            EventType::MembersAdded => 1,
            EventType::MemberJoined => 2,
            EventType::AdminsAdded => 3,
            EventType::NameChanged => 4,
            EventType::ColorChanged => 5,
            EventType::ImageChanged => 6,
            EventType::AdminsRemoved => 7,
            EventType::MembersRemoved => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "Created",
            EventType::NameChanged => "NameChanged",
            EventType::MembersAdded => "MembersAdded",
            EventType::MemberJoined => "MemberJoined",
            EventType::MembersRemoved => "MembersRemoved",
            EventType::AdminsAdded => "AdminsAdded",
            EventType::AdminsRemoved => "AdminsRemoved",
            EventType::ColorChanged => "ColorChanged",
            EventType::ImageChanged => "ImageChanged",
        }
    }
}

// ---------------------------------------------------------------------------
// EventBody (CBOR-encoded into raw_payload)
// ---------------------------------------------------------------------------

/// The signed part of an event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EventBody {
    pub event_type: EventType,
    pub clock_value: u64,
    pub members: Vec<IdentityKey>,
    pub name: String,
    pub color: String,
    pub image: Vec<u8>,
}

impl EventBody {
    fn new(event_type: EventType, clock_value: u64) -> Self {
        EventBody {
            event_type,
            clock_value,
            members: Vec::new(),
            name: String::new(),
            color: String::new(),
            image: Vec::new(),
        }
    }

    pub fn created(name: &str, color: &str, clock: u64) -> Self {
        EventBody {
            name: name.to_string(),
            color: color.to_string(),
            ..Self::new(EventType::Created, clock)
        }
    }

    pub fn name_changed(name: &str, clock: u64) -> Self {
        EventBody {
            name: name.to_string(),
            ..Self::new(EventType::NameChanged, clock)
        }
    }

    pub fn color_changed(color: &str, clock: u64) -> Self {
        EventBody {
            color: color.to_string(),
            ..Self::new(EventType::ColorChanged, clock)
        }
    }

    pub fn image_changed(image: Vec<u8>, clock: u64) -> Self {
        EventBody {
            image,
            ..Self::new(EventType::ImageChanged, clock)
        }
    }

    pub fn members_added(members: Vec<IdentityKey>, clock: u64) -> Self {
        EventBody {
            members,
            ..Self::new(EventType::MembersAdded, clock)
        }
    }

    pub fn member_joined(clock: u64) -> Self {
        Self::new(EventType::MemberJoined, clock)
    }

    pub fn member_removed(member: IdentityKey, clock: u64) -> Self {
        EventBody {
            members: vec![member],
            ..Self::new(EventType::MembersRemoved, clock)
        }
    }

    pub fn admins_added(admins: Vec<IdentityKey>, clock: u64) -> Self {
        EventBody {
            members: admins,
            ..Self::new(EventType::AdminsAdded, clock)
        }
    }

    pub fn admin_removed(admin: IdentityKey, clock: u64) -> Self {
        EventBody {
            members: vec![admin],
            ..Self::new(EventType::AdminsRemoved, clock)
        }
    }
}

// ---------------------------------------------------------------------------
// EventId
// ---------------------------------------------------------------------------

/// Content identity of a signed event. Two events are the same event iff
/// their ids match.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub [u8; 32]);

impl EventId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", hex::encode(&self.0[..6]))
    }
}

// ---------------------------------------------------------------------------
// MembershipUpdateEvent
// ---------------------------------------------------------------------------

/// Immutable, signed fact about a group.
///
/// The typed fields mirror the CBOR body in `raw_payload`; [`verify`] checks
/// that they agree and that the signature is valid for `from`.
///
/// [`verify`]: MembershipUpdateEvent::verify
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MembershipUpdateEvent {
    pub event_type: EventType,
    pub clock_value: u64,
    pub chat_id: ChatID,
    pub from: IdentityKey,
    pub members: Vec<IdentityKey>,
    pub name: String,
    pub color: String,
    pub image: Vec<u8>,
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
    pub raw_payload: Vec<u8>,
}

impl MembershipUpdateEvent {
    /// Encode and sign `body` for `chat_id`.
    pub fn create_signed(
        chat_id: &ChatID,
        body: EventBody,
        signer: &dyn EventSigner,
    ) -> Result<Self, EventError> {
        let raw_payload = cbor_encode(&body)?;

        if raw_payload.len() > MAX_EVENT_PAYLOAD_BYTES {
            return Err(EventError::PayloadTooLarge {
                size: raw_payload.len(),
                max: MAX_EVENT_PAYLOAD_BYTES,
            });
        }

        let digest = signable_digest(chat_id, &raw_payload);
        let signature = signer
            .sign(digest.as_bytes())
            .map_err(|e| EventError::SigningFailed(e.to_string()))?;

        Ok(MembershipUpdateEvent {
            event_type: body.event_type,
            clock_value: body.clock_value,
            chat_id: chat_id.clone(),
            from: signer.identity(),
            members: body.members,
            name: body.name,
            color: body.color,
            image: body.image,
            signature,
            raw_payload,
        })
    }

    /// Check the signature and that the typed fields match the signed body.
    pub fn verify(&self, verifier: &dyn SignatureVerifier) -> Result<(), EventError> {
        if self.raw_payload.len() > MAX_EVENT_PAYLOAD_BYTES {
            return Err(EventError::PayloadTooLarge {
                size: self.raw_payload.len(),
                max: MAX_EVENT_PAYLOAD_BYTES,
            });
        }

        let digest = signable_digest(&self.chat_id, &self.raw_payload);
        match verifier.verify(digest.as_bytes(), &self.signature, &self.from) {
            Ok(true) => {}
            Ok(false) | Err(_) => return Err(EventError::InvalidSignature),
        }

        let body: EventBody = cbor_decode(&self.raw_payload)?;
        if body != self.body() {
            return Err(EventError::PayloadMismatch);
        }
        Ok(())
    }

    /// Typed view of the event body.
    pub fn body(&self) -> EventBody {
        EventBody {
            event_type: self.event_type,
            clock_value: self.clock_value,
            members: self.members.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
            image: self.image.clone(),
        }
    }

    pub fn id(&self) -> EventId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.chat_id.as_bytes().len() as u64).to_le_bytes());
        hasher.update(self.chat_id.as_bytes());
        hasher.update(self.from.as_bytes());
        hasher.update(&self.signature);
        hasher.update(&self.raw_payload);
        EventId(*hasher.finalize().as_bytes())
    }

    /// Deterministic replay key: clock, then type rank, then identity.
    pub fn replay_key(&self) -> (u64, u8, EventId) {
        (self.clock_value, self.event_type.replay_rank(), self.id())
    }

    /// Single target of a `MembersRemoved` / `AdminsRemoved` event.
    pub fn single_target(&self) -> Option<&IdentityKey> {
        match self.members.as_slice() {
            [one] => Some(one),
            _ => None,
        }
    }
}

fn signable_digest(chat_id: &ChatID, raw_payload: &[u8]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(chat_id.as_bytes());
    hasher.update(raw_payload);
    hasher.finalize()
}

// ---------------------------------------------------------------------------
// CBOR helpers
// ---------------------------------------------------------------------------

/// CBOR-encode a value to bytes.
pub fn cbor_encode<T: Serialize>(value: &T) -> Result<Vec<u8>, EventError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| EventError::CborEncode(e.to_string()))?;
    Ok(buf)
}

/// CBOR-decode a value from bytes.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, EventError> {
    ciborium::from_reader(bytes).map_err(|e| EventError::CborDecode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signing::{Ed25519Signer, Ed25519Verifier};

    fn chat_for(signer: &Ed25519Signer) -> ChatID {
        ChatID::new_group(&signer.identity())
    }

    #[test]
    fn test_create_signed_and_verify() {
        let signer = Ed25519Signer::generate();
        let chat_id = chat_for(&signer);

        let event = MembershipUpdateEvent::create_signed(
            &chat_id,
            EventBody::created("Hikers", "#aa00ff", 1),
            &signer,
        )
        .unwrap();

        assert!(event.verify(&Ed25519Verifier).is_ok());
        assert_eq!(event.event_type, EventType::Created);
        assert_eq!(event.from, signer.identity());
        assert_eq!(event.name, "Hikers");
        assert_eq!(event.clock_value, 1);
    }

    #[test]
    fn test_verify_detects_tampered_fields() {
        let signer = Ed25519Signer::generate();
        let chat_id = chat_for(&signer);
        let mut event = MembershipUpdateEvent::create_signed(
            &chat_id,
            EventBody::name_changed("Old", 4),
            &signer,
        )
        .unwrap();

        // Typed field no longer matches the signed body.
        event.name = "New".into();
        assert_eq!(event.verify(&Ed25519Verifier), Err(EventError::PayloadMismatch));
    }

    #[test]
    fn test_verify_detects_tampered_payload() {
        let signer = Ed25519Signer::generate();
        let chat_id = chat_for(&signer);
        let mut event = MembershipUpdateEvent::create_signed(
            &chat_id,
            EventBody::member_joined(2),
            &signer,
        )
        .unwrap();

        event.raw_payload.push(0xFF);
        assert_eq!(event.verify(&Ed25519Verifier), Err(EventError::InvalidSignature));
    }

    #[test]
    fn test_verify_detects_wrong_signer() {
        let signer = Ed25519Signer::generate();
        let other = Ed25519Signer::generate();
        let chat_id = chat_for(&signer);
        let mut event = MembershipUpdateEvent::create_signed(
            &chat_id,
            EventBody::member_joined(2),
            &signer,
        )
        .unwrap();

        event.from = other.identity();
        assert_eq!(event.verify(&Ed25519Verifier), Err(EventError::InvalidSignature));
    }

    #[test]
    fn test_signature_is_bound_to_chat() {
        let signer = Ed25519Signer::generate();
        let mut event = MembershipUpdateEvent::create_signed(
            &chat_for(&signer),
            EventBody::member_joined(2),
            &signer,
        )
        .unwrap();

        event.chat_id = chat_for(&signer);
        assert_eq!(event.verify(&Ed25519Verifier), Err(EventError::InvalidSignature));
    }

    #[test]
    fn test_oversized_image_rejected() {
        let signer = Ed25519Signer::generate();
        let result = MembershipUpdateEvent::create_signed(
            &chat_for(&signer),
            EventBody::image_changed(vec![0u8; MAX_EVENT_PAYLOAD_BYTES + 1], 3),
            &signer,
        );
        assert!(matches!(result, Err(EventError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_event_id_is_stable_and_distinct() {
        let signer = Ed25519Signer::generate();
        let chat_id = chat_for(&signer);
        let a = MembershipUpdateEvent::create_signed(&chat_id, EventBody::member_joined(2), &signer)
            .unwrap();
        let b = MembershipUpdateEvent::create_signed(&chat_id, EventBody::member_joined(3), &signer)
            .unwrap();

        assert_eq!(a.id(), a.clone().id());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_replay_rank_puts_removal_last() {
        let ranks: Vec<u8> = [
            EventType::Created,
            EventType::MembersAdded,
            EventType::MemberJoined,
            EventType::AdminsAdded,
            EventType::NameChanged,
            EventType::ColorChanged,
            EventType::ImageChanged,
            EventType::AdminsRemoved,
            EventType::MembersRemoved,
        ]
        .iter()
        .map(|t| t.replay_rank())
        .collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
        assert_eq!(EventType::MembersRemoved.replay_rank(), 8);
    }

    #[test]
    fn test_single_target() {
        let signer = Ed25519Signer::generate();
        let target = IdentityKey([9; 32]);
        let event = MembershipUpdateEvent::create_signed(
            &chat_for(&signer),
            EventBody::member_removed(target, 5),
            &signer,
        )
        .unwrap();
        assert_eq!(event.single_target(), Some(&target));
    }
}
