use serde::{Deserialize, Serialize};

use crate::contact::ContactRequestState;
use crate::error::{require_clock, ValidationError};
use crate::ids::IdentityKey;
use crate::protocol::{MessageType, WirePayload};

/// A peer's snapshot of both contact request tracks, named from the peer's
/// own perspective. States are raw [`ContactRequestState`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactRequestPropagatedState {
    pub local_clock: u64,
    pub local_state: u64,
    pub remote_clock: u64,
    pub remote_state: u64,
}

/// Profile and relationship announcement sent to a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactUpdate {
    pub clock: u64,
    pub display_name: String,
    pub ens_name: String,
    pub profile_image: String,
    /// Clock of the sender's contact request; zero when the update carries
    /// no request.
    pub contact_request_clock: u64,
    pub contact_request_propagated_state: Option<ContactRequestPropagatedState>,
    /// Sender identity. Must match the authenticated transport sender.
    pub public_key: IdentityKey,
}

impl ContactUpdate {
    pub fn validate(&self, sender: &IdentityKey) -> Result<(), ValidationError> {
        require_clock(self.clock)?;
        if &self.public_key != sender {
            return Err(ValidationError::MalformedPayload(format!(
                "contact update key {} does not match sender {}",
                self.public_key.short(),
                sender.short()
            )));
        }
        Ok(())
    }
}

impl WirePayload for ContactUpdate {
    const MESSAGE_TYPE: MessageType = MessageType::ContactUpdate;
}

/// A chat message that opens a contact request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRequestMessage {
    pub id: String,
    pub clock: u64,
    pub timestamp: u64,
    pub text: String,
}

impl WirePayload for ContactRequestMessage {
    const MESSAGE_TYPE: MessageType = MessageType::ContactRequest;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptContactRequest {
    /// Id of the contact request message being accepted.
    pub id: String,
    pub clock: u64,
}

impl WirePayload for AcceptContactRequest {
    const MESSAGE_TYPE: MessageType = MessageType::AcceptContactRequest;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetractContactRequest {
    pub clock: u64,
}

impl WirePayload for RetractContactRequest {
    const MESSAGE_TYPE: MessageType = MessageType::RetractContactRequest;
}

/// Contact request state pushed between our own paired devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncContactRequestState {
    pub contact_id: IdentityKey,
    pub local_state: u64,
    pub local_clock: u64,
    pub remote_state: u64,
    pub remote_clock: u64,
}

impl SyncContactRequestState {
    /// Decode the raw state values.
    pub fn states(
        &self,
    ) -> Result<(ContactRequestState, ContactRequestState), ValidationError> {
        Ok((
            ContactRequestState::from_u64(self.local_state)?,
            ContactRequestState::from_u64(self.remote_state)?,
        ))
    }
}

impl WirePayload for SyncContactRequestState {
    const MESSAGE_TYPE: MessageType = MessageType::SyncContactRequestState;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(key: IdentityKey) -> ContactUpdate {
        ContactUpdate {
            clock: 7,
            display_name: "Alice".into(),
            ens_name: String::new(),
            profile_image: String::new(),
            contact_request_clock: 3,
            contact_request_propagated_state: Some(ContactRequestPropagatedState {
                local_clock: 3,
                local_state: ContactRequestState::Sent.as_u64(),
                remote_clock: 0,
                remote_state: 0,
            }),
            public_key: key,
        }
    }

    #[test]
    fn test_contact_update_envelope_roundtrip() {
        let u = update(IdentityKey([1; 32]));
        let envelope = u.to_envelope().unwrap();
        assert_eq!(envelope.message_type, MessageType::ContactUpdate);
        assert_eq!(ContactUpdate::from_envelope(&envelope).unwrap(), u);
    }

    #[test]
    fn test_contact_update_json() {
        let u = update(IdentityKey([1; 32]));
        let json = u.to_json().unwrap();
        assert_eq!(ContactUpdate::from_json(&json).unwrap(), u);
    }

    #[test]
    fn test_contact_update_validation() {
        let key = IdentityKey([1; 32]);
        assert!(update(key).validate(&key).is_ok());
        assert!(update(key).validate(&IdentityKey([2; 32])).is_err());

        let mut zero = update(key);
        zero.clock = 0;
        assert_eq!(zero.validate(&key), Err(ValidationError::ZeroClock));
    }

    #[test]
    fn test_sync_state_rejects_unknown_values() {
        let sync = SyncContactRequestState {
            contact_id: IdentityKey([3; 32]),
            local_state: 2,
            local_clock: 1,
            remote_state: 77,
            remote_clock: 1,
        };
        assert_eq!(sync.states(), Err(ValidationError::UnknownState(77)));
    }
}
