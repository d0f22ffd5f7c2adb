//! Inbound routing.
//!
//! Wire bytes decode into the closed [`IncomingMessage`] type; the messenger
//! matches on it exhaustively, so adding a message type is a compile error
//! until every path handles it.

use accord_protocol::ids::IdentityKey;
use accord_protocol::protocol::{
    AcceptContactRequest, ChatMessage, ContactRequestMessage, ContactUpdate, DeleteMessage,
    EditMessage, MembershipUpdateMessage, MessageType, RetractContactRequest,
    SyncContactRequestState, WireEnvelope, WireError, WirePayload,
};

use crate::error::{MessengerError, Result};
use crate::messenger::Messenger;
use crate::response::MessengerResponse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    ChatMessage(ChatMessage),
    ContactRequest(ContactRequestMessage),
    ContactUpdate(ContactUpdate),
    AcceptContactRequest(AcceptContactRequest),
    RetractContactRequest(RetractContactRequest),
    SyncContactRequestState(SyncContactRequestState),
    MembershipUpdate(MembershipUpdateMessage),
    EditMessage(EditMessage),
    DeleteMessage(DeleteMessage),
}

impl IncomingMessage {
    /// Decode a serialized `WireEnvelope`.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, WireError> {
        let envelope = WireEnvelope::deserialize(bytes)?;
        Self::from_envelope(&envelope)
    }

    pub fn from_envelope(envelope: &WireEnvelope) -> std::result::Result<Self, WireError> {
        Ok(match envelope.message_type {
            MessageType::ChatMessage => Self::ChatMessage(ChatMessage::from_envelope(envelope)?),
            MessageType::ContactRequest => {
                Self::ContactRequest(ContactRequestMessage::from_envelope(envelope)?)
            }
            MessageType::ContactUpdate => {
                Self::ContactUpdate(ContactUpdate::from_envelope(envelope)?)
            }
            MessageType::AcceptContactRequest => {
                Self::AcceptContactRequest(AcceptContactRequest::from_envelope(envelope)?)
            }
            MessageType::RetractContactRequest => {
                Self::RetractContactRequest(RetractContactRequest::from_envelope(envelope)?)
            }
            MessageType::SyncContactRequestState => {
                Self::SyncContactRequestState(SyncContactRequestState::from_envelope(envelope)?)
            }
            MessageType::MembershipUpdate => {
                Self::MembershipUpdate(MembershipUpdateMessage::from_envelope(envelope)?)
            }
            MessageType::EditMessage => Self::EditMessage(EditMessage::from_envelope(envelope)?),
            MessageType::DeleteMessage => {
                Self::DeleteMessage(DeleteMessage::from_envelope(envelope)?)
            }
        })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ChatMessage(_) => MessageType::ChatMessage,
            Self::ContactRequest(_) => MessageType::ContactRequest,
            Self::ContactUpdate(_) => MessageType::ContactUpdate,
            Self::AcceptContactRequest(_) => MessageType::AcceptContactRequest,
            Self::RetractContactRequest(_) => MessageType::RetractContactRequest,
            Self::SyncContactRequestState(_) => MessageType::SyncContactRequestState,
            Self::MembershipUpdate(_) => MessageType::MembershipUpdate,
            Self::EditMessage(_) => MessageType::EditMessage,
            Self::DeleteMessage(_) => MessageType::DeleteMessage,
        }
    }
}

impl Messenger {
    /// Entry point for authenticated inbound bytes from `sender`.
    ///
    /// Redelivered payloads are dropped by the replay cache and yield an empty
    /// response. A payload whose handling failed is not recorded, so a
    /// redelivery is handled again.
    pub fn handle_raw(&self, sender: &IdentityKey, bytes: &[u8]) -> Result<MessengerResponse> {
        let Some(claim) = self.replay_cache().begin(sender, bytes) else {
            return Ok(MessengerResponse::new());
        };
        let result = IncomingMessage::decode(bytes)
            .map_err(MessengerError::from)
            .and_then(|message| self.handle(sender, message));
        if let Err(e) = &result {
            log::warn!("Rejected inbound message from {}: {}", sender.short(), e);
        }
        claim.complete(result.is_ok());
        result
    }

    /// Route one decoded message to its handler.
    pub fn handle(
        &self,
        sender: &IdentityKey,
        message: IncomingMessage,
    ) -> Result<MessengerResponse> {
        log::debug!(
            "Handling {} from {}",
            message.message_type().as_str(),
            sender.short()
        );
        match message {
            IncomingMessage::ChatMessage(m) => self.handle_chat_message(sender, &m),
            IncomingMessage::ContactRequest(m) => self.handle_contact_request(sender, &m),
            IncomingMessage::ContactUpdate(m) => self.handle_contact_update(sender, &m),
            IncomingMessage::AcceptContactRequest(m) => {
                self.handle_accept_contact_request(sender, &m)
            }
            IncomingMessage::RetractContactRequest(m) => {
                self.handle_retract_contact_request(sender, &m)
            }
            IncomingMessage::SyncContactRequestState(m) => {
                self.handle_sync_contact_request_state(sender, &m)
            }
            IncomingMessage::MembershipUpdate(m) => self.handle_membership_update(sender, &m),
            IncomingMessage::EditMessage(m) => self.handle_edit_message(sender, &m),
            IncomingMessage::DeleteMessage(m) => self.handle_delete_message(sender, &m),
        }
    }
}
