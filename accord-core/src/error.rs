use thiserror::Error;

use accord_protocol::group::GroupError;
use accord_protocol::ids::{ChatID, IdentityKey};
use accord_protocol::message::MessageError;
use accord_protocol::protocol::WireError;
use accord_protocol::ValidationError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum MessengerError {
    #[error("Contact not found: {0:?}")]
    ContactNotFound(IdentityKey),

    #[error("Chat not found: {0:?}")]
    ChatNotFound(ChatID),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Not an admin of group {0:?}")]
    NotControlNode(ChatID),

    #[error("{0:?} may not delete this message")]
    InvalidDeletePermission(IdentityKey),

    #[error("Can't add members who are not mutual contacts ({0:?})")]
    GroupChatAddedContacts(IdentityKey),

    #[error("Message from {0:?} not allowed")]
    MessageNotAllowed(IdentityKey),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Message(MessageError),
}

impl From<MessageError> for MessengerError {
    fn from(e: MessageError) -> Self {
        match e {
            MessageError::InvalidDeletePermission(by) => MessengerError::InvalidDeletePermission(by),
            other => MessengerError::Message(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, MessengerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_permission_maps_to_messenger_error() {
        let by = IdentityKey::from_bytes([3u8; 32]);
        let err: MessengerError = MessageError::InvalidDeletePermission(by).into();
        assert!(matches!(err, MessengerError::InvalidDeletePermission(k) if k == by));

        let err: MessengerError = MessageError::NotMessageAuthor.into();
        assert!(matches!(err, MessengerError::Message(MessageError::NotMessageAuthor)));
    }
}
