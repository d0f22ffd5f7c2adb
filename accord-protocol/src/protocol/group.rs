use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::group::event::MembershipUpdateEvent;
use crate::group::limits::MAX_EVENTS_PER_MESSAGE;
use crate::ids::ChatID;
use crate::protocol::{MessageType, WirePayload};

/// A batch of membership events for one group chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipUpdateMessage {
    pub chat_id: ChatID,
    pub events: Vec<MembershipUpdateEvent>,
}

impl MembershipUpdateMessage {
    pub fn new(chat_id: ChatID, events: Vec<MembershipUpdateEvent>) -> Self {
        Self { chat_id, events }
    }

    /// Shape checks only; signatures and permissions are checked on merge.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.events.is_empty() {
            return Err(ValidationError::MalformedPayload(
                "membership update carries no events".into(),
            ));
        }
        if self.events.len() > MAX_EVENTS_PER_MESSAGE {
            return Err(ValidationError::MalformedPayload(format!(
                "membership update carries {} events (max {})",
                self.events.len(),
                MAX_EVENTS_PER_MESSAGE
            )));
        }
        if let Some(stray) = self.events.iter().find(|e| e.chat_id != self.chat_id) {
            return Err(ValidationError::WrongChat {
                expected: self.chat_id.to_string(),
                got: stray.chat_id.to_string(),
            });
        }
        Ok(())
    }
}

impl WirePayload for MembershipUpdateMessage {
    const MESSAGE_TYPE: MessageType = MessageType::MembershipUpdate;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signing::{Ed25519Signer, EventSigner};
    use crate::group::event::EventBody;

    fn created(signer: &Ed25519Signer) -> MembershipUpdateEvent {
        let chat_id = ChatID::new_group(&signer.identity());
        MembershipUpdateEvent::create_signed(&chat_id, EventBody::created("g", "", 1), signer)
            .unwrap()
    }

    #[test]
    fn test_validate_accepts_matching_batch() {
        let signer = Ed25519Signer::generate();
        let event = created(&signer);
        let msg = MembershipUpdateMessage::new(event.chat_id.clone(), vec![event]);
        assert!(msg.validate().is_ok());

        let decoded = MembershipUpdateMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_validate_rejects_empty() {
        let signer = Ed25519Signer::generate();
        let msg = MembershipUpdateMessage::new(ChatID::new_group(&signer.identity()), vec![]);
        assert!(matches!(
            msg.validate(),
            Err(ValidationError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_validate_rejects_foreign_event() {
        let signer = Ed25519Signer::generate();
        let event = created(&signer);
        let msg = MembershipUpdateMessage::new(ChatID::new_group(&signer.identity()), vec![event]);
        assert!(matches!(msg.validate(), Err(ValidationError::WrongChat { .. })));
    }
}
