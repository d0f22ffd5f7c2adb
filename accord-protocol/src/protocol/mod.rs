/// Wire payloads.
///
/// Every message travels inside a [`WireEnvelope`] carrying a format version
/// and a [`MessageType`] tag. Envelopes and payloads are bincode-encoded;
/// JSON helpers exist for debugging and host bridges.
pub mod chat;
pub mod contact;
#[cfg(feature = "groups")]
pub mod group;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ValidationError;

pub use chat::{ChatMessage, DeleteMessage, EditMessage};
pub use contact::{
    AcceptContactRequest, ContactRequestMessage, ContactRequestPropagatedState, ContactUpdate,
    RetractContactRequest, SyncContactRequestState,
};
#[cfg(feature = "groups")]
pub use group::MembershipUpdateMessage;

/// Current envelope format version.
pub const WIRE_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Bincode serialization failed: {0}")]
    Bincode(String),

    #[error("JSON serialization failed: {0}")]
    Json(String),

    #[error("Expected {expected:?} payload, got {got:?}")]
    TypeMismatch { expected: MessageType, got: MessageType },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    ChatMessage,
    ContactRequest,
    ContactUpdate,
    AcceptContactRequest,
    RetractContactRequest,
    SyncContactRequestState,
    MembershipUpdate,
    EditMessage,
    DeleteMessage,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::ChatMessage => "CHAT_MESSAGE",
            MessageType::ContactRequest => "CONTACT_REQUEST",
            MessageType::ContactUpdate => "CONTACT_UPDATE",
            MessageType::AcceptContactRequest => "ACCEPT_CONTACT_REQUEST",
            MessageType::RetractContactRequest => "RETRACT_CONTACT_REQUEST",
            MessageType::SyncContactRequestState => "SYNC_CONTACT_REQUEST_STATE",
            MessageType::MembershipUpdate => "MEMBERSHIP_UPDATE",
            MessageType::EditMessage => "EDIT_MESSAGE",
            MessageType::DeleteMessage => "DELETE_MESSAGE",
        }
    }
}

// ---------------------------------------------------------------------------
// WireEnvelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub version: u8,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
}

impl WireEnvelope {
    pub fn serialize(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(|e| WireError::Bincode(e.to_string()))
    }

    /// Decode and check the format version.
    pub fn deserialize(data: &[u8]) -> Result<Self, WireError> {
        let envelope: WireEnvelope =
            bincode::deserialize(data).map_err(|e| WireError::Bincode(e.to_string()))?;
        if envelope.version != WIRE_VERSION {
            return Err(ValidationError::UnsupportedVersion(envelope.version).into());
        }
        Ok(envelope)
    }
}

// ---------------------------------------------------------------------------
// WirePayload
// ---------------------------------------------------------------------------

/// A typed payload with a fixed [`MessageType`] tag.
pub trait WirePayload: Serialize + DeserializeOwned + Sized {
    const MESSAGE_TYPE: MessageType;

    fn encode(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(|e| WireError::Bincode(e.to_string()))
    }

    fn decode(data: &[u8]) -> Result<Self, WireError> {
        bincode::deserialize(data).map_err(|e| WireError::Bincode(e.to_string()))
    }

    fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(|e| WireError::Json(e.to_string()))
    }

    fn from_json(json: &str) -> Result<Self, WireError> {
        serde_json::from_str(json).map_err(|e| WireError::Json(e.to_string()))
    }

    fn to_envelope(&self) -> Result<WireEnvelope, WireError> {
        Ok(WireEnvelope {
            version: WIRE_VERSION,
            message_type: Self::MESSAGE_TYPE,
            payload: self.encode()?,
        })
    }

    fn from_envelope(envelope: &WireEnvelope) -> Result<Self, WireError> {
        if envelope.message_type != Self::MESSAGE_TYPE {
            return Err(WireError::TypeMismatch {
                expected: Self::MESSAGE_TYPE,
                got: envelope.message_type,
            });
        }
        Self::decode(&envelope.payload)
    }
}
