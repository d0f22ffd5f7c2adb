//! Outbound dispatch sink.
//!
//! The messenger commits local state first and then hands zero or more
//! [`RawMessage`]s to a [`Dispatch`] implementation owned by the transport
//! layer. A failed send is logged and never rolls local state back; retries
//! belong to the transport (`resend_automatically`).

use std::sync::{Mutex, PoisonError};

use accord_protocol::ids::{ChatID, IdentityKey};
use accord_protocol::protocol::{MessageType, WireError, WirePayload};

/// Transport-assigned id of a sent message.
pub type MessageId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// One peer, over their one-to-one channel.
    Peer(IdentityKey),
    /// Every listed member of a group chat.
    Group {
        chat_id: ChatID,
        members: Vec<IdentityKey>,
    },
    /// Our own paired devices.
    PairedDevices,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub recipient: Recipient,
    /// A serialized `WireEnvelope`.
    pub payload: Vec<u8>,
    pub message_type: MessageType,
    pub resend_automatically: bool,
}

impl RawMessage {
    pub fn new<P: WirePayload>(
        recipient: Recipient,
        payload: &P,
        resend_automatically: bool,
    ) -> Result<Self, WireError> {
        Ok(RawMessage {
            recipient,
            payload: payload.to_envelope()?.serialize()?,
            message_type: P::MESSAGE_TYPE,
            resend_automatically,
        })
    }
}

/// Outbound sink implemented by the transport layer.
pub trait Dispatch: Send + Sync {
    fn send(&self, message: RawMessage) -> anyhow::Result<MessageId>;
}

/// Content-derived message id (BLAKE3 of the payload, hex).
pub fn payload_id(payload: &[u8]) -> MessageId {
    hex::encode(blake3::hash(payload).as_bytes())
}

// ---------------------------------------------------------------------------
// RecordingDispatch
// ---------------------------------------------------------------------------

/// Keeps every sent message in memory. Used by hosts that batch outbound
/// traffic themselves, and by tests.
#[derive(Debug, Default)]
pub struct RecordingDispatch {
    sent: Mutex<Vec<RawMessage>>,
    failing: Mutex<bool>,
}

impl RecordingDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail (the message is not recorded).
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }

    /// Drain and return everything sent so far.
    pub fn take(&self) -> Vec<RawMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn sent_types(&self) -> Vec<MessageType> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|m| m.message_type)
            .collect()
    }
}

impl Dispatch for RecordingDispatch {
    fn send(&self, message: RawMessage) -> anyhow::Result<MessageId> {
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            anyhow::bail!("transport unavailable");
        }
        let id = payload_id(&message.payload);
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        Ok(id)
    }
}
